//! Operand classification: which registers and flags an instruction reads
//! and writes, normalized for the input search.
//!
//! The read set is the subtle part. It starts from register operands marked
//! READ plus the base/index registers of memory operands, then adds every
//! register operand of width <= 16 bits even if it is pure-write: the upper
//! bits of its enclosing root are preserved by the CPU and therefore
//! semantically read. Overlapping views are collapsed to one member per root
//! (the widest wins) and high-byte registers are remapped to their word
//! counterpart so downstream indexing uses a contiguous low-offset view.

use opcheck_isa::decode::{InstrSummary, OperandKind, RegAccess};
use opcheck_isa::{regs, Register};

/// Classifier output for one decoded instruction.
#[derive(Debug, Clone, Default)]
pub struct Classified {
    /// Registers whose value feeds the instruction, width-descending.
    pub regs_read: Vec<Register>,
    /// Registers the instruction writes, width-descending.
    pub regs_modified: Vec<Register>,
    pub flags_modified: u32,
    pub flags_set_0: u32,
    pub flags_set_1: u32,
    pub flags_read: u32,
}

fn register_uses(summary: &InstrSummary) -> Vec<RegAccess> {
    let mut uses = Vec::new();
    for op in &summary.operands {
        match op.kind {
            OperandKind::Register(reg) => uses.push(RegAccess {
                reg,
                read: op.read,
                write: op.write,
            }),
            OperandKind::Memory(mem) => {
                for reg in [mem.base, mem.index] {
                    if reg != Register::None && !regs::is_filtered(reg) {
                        uses.push(RegAccess {
                            reg,
                            read: true,
                            write: false,
                        });
                    }
                }
            }
            _ => {}
        }
    }
    uses.extend(summary.implicit_regs.iter().copied());
    uses
}

fn collect_modified(uses: &[RegAccess]) -> Vec<Register> {
    let mut modified: Vec<Register> = Vec::new();
    for acc in uses {
        if acc.write && !regs::is_filtered(acc.reg) && !modified.contains(&acc.reg) {
            modified.push(acc.reg);
        }
    }
    regs::sort_widest_first(&mut modified);
    modified
}

fn collect_read(uses: &[RegAccess]) -> Vec<Register> {
    let mut read: Vec<Register> = Vec::new();
    let mut insert = |reg: Register| {
        if !regs::is_filtered(reg) && !read.contains(&reg) {
            read.push(reg);
        }
    };
    for acc in uses {
        if acc.read {
            insert(acc.reg);
        }
    }
    // Narrow destinations leave the rest of the root intact, which makes the
    // root an input even for pure writes.
    for acc in uses {
        if regs::width_bits(acc.reg) <= 16 {
            insert(acc.reg);
        }
    }

    // Collapse aliasing views: one member per root, widest wins, high-byte
    // views remapped to their word register first.
    read.sort_by_key(|reg| *reg as u32);
    let mut per_root: Vec<(Register, Register)> = Vec::new();
    for reg in read {
        let root = regs::root_reg(reg);
        let view = regs::remap_high_byte(reg);
        match per_root.iter_mut().find(|(r, _)| *r == root) {
            Some((_, best)) => {
                if regs::width_bits(view) > regs::width_bits(*best) {
                    *best = view;
                }
            }
            None => per_root.push((root, view)),
        }
    }

    let mut collapsed: Vec<Register> = per_root.into_iter().map(|(_, view)| view).collect();
    regs::sort_widest_first(&mut collapsed);
    collapsed
}

pub fn classify(summary: &InstrSummary) -> Classified {
    let uses = register_uses(summary);
    Classified {
        regs_read: collect_read(&uses),
        regs_modified: collect_modified(&uses),
        flags_modified: summary.flags.modified,
        flags_set_0: summary.flags.set_0,
        flags_set_1: summary.flags.set_1,
        flags_read: summary.flags.tested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcheck_isa::{decode, flags, DecodeMode};
    use pretty_assertions::assert_eq;

    fn classify_bytes(bytes: &[u8]) -> Classified {
        let summary = decode::summarize(DecodeMode::Bits64, 0, bytes).expect("decode");
        classify(&summary)
    }

    #[test]
    fn xor_eax_eax() {
        let c = classify_bytes(&[0x31, 0xC0]);
        assert_eq!(c.regs_modified, vec![Register::EAX]);
        assert_eq!(c.regs_read, vec![Register::EAX]);
        assert_eq!(c.flags_modified, flags::SF | flags::ZF | flags::PF);
        assert_eq!(c.flags_set_0, flags::CF | flags::OF);
    }

    #[test]
    fn high_byte_operands_widen_to_the_word_view() {
        // 00 E0 => add al, ah: reads AL and AH, which collapse to AX.
        let c = classify_bytes(&[0x00, 0xE0]);
        assert_eq!(c.regs_read, vec![Register::AX]);
        assert_eq!(c.regs_modified, vec![Register::AL]);
    }

    #[test]
    fn div_includes_implicit_operands() {
        // 48 F7 F1 => div rcx
        let c = classify_bytes(&[0x48, 0xF7, 0xF1]);
        assert_eq!(c.regs_read, vec![Register::RAX, Register::RCX, Register::RDX]);
        assert_eq!(c.regs_modified, vec![Register::RAX, Register::RDX]);
    }

    #[test]
    fn mov_imm_has_no_reg_inputs() {
        // B8 01 00 00 00 => mov eax, 1
        let c = classify_bytes(&[0xB8, 0x01, 0x00, 0x00, 0x00]);
        assert!(c.regs_read.is_empty());
        assert_eq!(c.regs_modified, vec![Register::EAX]);
        assert_eq!(c.flags_modified, 0);
    }

    #[test]
    fn lea_reads_address_registers_only() {
        // 48 8D 04 1B => lea rax, [rbx+rbx]
        let c = classify_bytes(&[0x48, 0x8D, 0x04, 0x1B]);
        assert_eq!(c.regs_read, vec![Register::RBX]);
        assert_eq!(c.regs_modified, vec![Register::RAX]);
        assert_eq!(c.flags_modified, 0);
    }

    #[test]
    fn narrow_pure_write_is_still_an_input() {
        // B0 05 => mov al, 5: AL is pure-write but its root is preserved.
        let c = classify_bytes(&[0xB0, 0x05]);
        assert_eq!(c.regs_read, vec![Register::AL]);
        assert_eq!(c.regs_modified, vec![Register::AL]);
    }

    #[test]
    fn wide_pure_write_is_not_an_input() {
        // 0F B6 C3 => movzx eax, bl: EAX is fully overwritten.
        let c = classify_bytes(&[0x0F, 0xB6, 0xC3]);
        assert_eq!(c.regs_read, vec![Register::BL]);
        assert_eq!(c.regs_modified, vec![Register::EAX]);
    }

    #[test]
    fn read_set_is_width_descending() {
        // 66 01 D8 => add ax, bx ; plus div for a mixed-width check
        let c = classify_bytes(&[0x66, 0x01, 0xD8]);
        assert_eq!(c.regs_read, vec![Register::AX, Register::BX]);

        // F6 F3 => div bl: reads AX (implicit) and BL.
        let c = classify_bytes(&[0xF6, 0xF3]);
        assert_eq!(c.regs_read.first(), Some(&Register::AX));
        assert!(c.regs_read.contains(&Register::BL));
    }

    #[test]
    fn cmov_reads_flags_and_both_registers() {
        // 48 0F 44 C3 => cmove rax, rbx
        let c = classify_bytes(&[0x48, 0x0F, 0x44, 0xC3]);
        assert_eq!(c.flags_read, flags::ZF);
        assert!(c.regs_read.contains(&Register::RBX));
        assert_eq!(c.regs_modified, vec![Register::RAX]);
    }
}
