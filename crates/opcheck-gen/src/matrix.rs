//! Coverage-matrix construction.
//!
//! A coverage cell names one observation the search must witness: a
//! destination-register bit at a given polarity, a flag bit at a given
//! polarity, or an exception. Cells that the instruction's semantics make
//! unreachable are pruned up front so the search never burns its budget on
//! impossible targets.
//!
//! Matrix order: register cells (wider registers first, ascending bit, zero
//! before one), then flag cells (ascending bit), then exception cells.

use opcheck_isa::decode::{InstrSummary, MemRef};
use opcheck_isa::{flags, regs, Register};

use crate::classify::Classified;
use crate::record::ExceptionKind;
use crate::semantics::{
    semantics_for, FirstBitZeroRule, ImmBitRule, MaxBitsRule, ResultZeroRule,
};

/// What a cell observes. Exception cells carry no target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellTarget {
    Reg(Register),
    Flags,
    None,
}

/// One unit of required coverage. Either a bit witness (`exception ==
/// ExceptionKind::None`) or an exception witness (`target == CellTarget::None`),
/// never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageCell {
    pub exception: ExceptionKind,
    pub target: CellTarget,
    pub bit_pos: u16,
    pub expected_bit: u8,
}

impl CoverageCell {
    pub fn bit(target: CellTarget, bit_pos: u16, expected_bit: u8) -> Self {
        debug_assert!(!matches!(target, CellTarget::None));
        Self {
            exception: ExceptionKind::None,
            target,
            bit_pos,
            expected_bit,
        }
    }

    pub fn exception(kind: ExceptionKind) -> Self {
        debug_assert!(kind != ExceptionKind::None);
        Self {
            exception: kind,
            target: CellTarget::None,
            bit_pos: 0,
            expected_bit: 0,
        }
    }

    pub fn is_exception(&self) -> bool {
        self.exception != ExceptionKind::None
    }
}

/// Facts about the operand shape that drive pruning.
struct StaticFacts {
    dst_src_same: bool,
    right_imm: Option<u64>,
    right_zero: bool,
    mem_operand: Option<MemRef>,
}

impl StaticFacts {
    fn gather(summary: &InstrSummary) -> Self {
        let op0_reg = summary.operands.first().and_then(|op| op.register());
        let op1 = summary.operands.get(1);
        let op1_reg = op1.and_then(|op| op.register());
        let right_imm = op1.and_then(|op| op.immediate());
        Self {
            dst_src_same: matches!((op0_reg, op1_reg), (Some(a), Some(b)) if a == b),
            right_imm,
            right_zero: right_imm == Some(0),
            mem_operand: summary.operands.iter().find_map(|op| op.memory()),
        }
    }
}

pub fn build_matrix(summary: &InstrSummary, classified: &Classified) -> Vec<CoverageCell> {
    let sem = semantics_for(summary.mnemonic);
    let facts = StaticFacts::gather(summary);

    let result_zero_shape = match sem.result_zero {
        ResultZeroRule::Never => false,
        ResultZeroRule::DstEqSrc => facts.dst_src_same,
        ResultZeroRule::RhsZeroImm => facts.right_zero,
        // Resolved per destination width below.
        ResultZeroRule::NarrowDest => false,
    };

    let first_bit_always_zero = match sem.first_bit_zero {
        FirstBitZeroRule::Never => false,
        FirstBitZeroRule::DstEqSrc => facts.dst_src_same,
        FirstBitZeroRule::SelfScaledSum => facts.mem_operand.is_some_and(|mem| {
            mem.base != Register::None && mem.index == mem.base && mem.displacement == 0
        }),
    };

    let num_bits_zero: u16 = if sem.scale_zeroes_low_bits {
        match facts.mem_operand {
            Some(mem)
                if mem.base == Register::None
                    && mem.index != Register::None
                    && mem.scale > 1
                    && mem.displacement == 0 =>
            {
                // Scaling by 2/4/8 is a shift by 1/2/3.
                mem.scale.trailing_zeros() as u16
            }
            _ => 0,
        }
    } else {
        0
    };

    let mut matrix = Vec::new();

    for &reg in &classified.regs_modified {
        let width = regs::width_bits(reg);
        let result_always_zero =
            result_zero_shape || (sem.result_zero == ResultZeroRule::NarrowDest && width <= 16);
        let max_bits = match sem.max_bits {
            MaxBitsRule::DestWidth => width,
            MaxBitsRule::One => 1,
            MaxBitsRule::AddressWidth => summary.address_width,
        };

        for bit_pos in 0..width {
            let mut test_zero = true;
            let mut test_one =
                bit_pos >= num_bits_zero && !result_always_zero && bit_pos < max_bits;

            if let Some(imm) = facts.right_imm {
                let imm_bit = (imm >> bit_pos) & 1;
                match sem.imm_rule {
                    ImmBitRule::None => {}
                    ImmBitRule::Mirror => {
                        test_zero = imm_bit == 0;
                        test_one = imm_bit == 1;
                    }
                    ImmBitRule::StickyOnes => {
                        test_zero = imm_bit == 0;
                    }
                    ImmBitRule::StickyZeros => {
                        test_one = imm_bit == 1;
                    }
                    ImmBitRule::ClearedBit => {
                        test_one = imm % u64::from(summary.operand_width) != u64::from(bit_pos);
                    }
                }
            }

            if bit_pos == 0 && first_bit_always_zero {
                test_one = false;
            }

            if test_zero {
                matrix.push(CoverageCell::bit(CellTarget::Reg(reg), bit_pos, 0));
            }
            if test_one {
                matrix.push(CoverageCell::bit(CellTarget::Reg(reg), bit_pos, 1));
            }
        }
    }

    // Flag cells. Immediate-input forms skip operand-dependent flags; the
    // forced set_0/set_1 bits are emitted regardless.
    let result_zero_for_flags = result_zero_shape
        || (sem.result_zero == ResultZeroRule::NarrowDest && summary.operand_width <= 16);
    for bit_pos in 0..32u16 {
        let flag = 1u32 << bit_pos;

        if facts.right_imm.is_none() && classified.flags_modified & flag != 0 {
            let mut test_zero = true;
            let mut test_one = true;

            if flag == flags::ZF || flag == flags::PF {
                test_zero = !result_zero_for_flags;
            }
            if flag == flags::CF || flag == flags::AF {
                test_one = !result_zero_for_flags && !facts.right_zero;
            }
            if flag == flags::OF {
                test_one = !facts.dst_src_same && !facts.right_zero;
            }
            if flag == flags::SF {
                test_one = !result_zero_for_flags;
            }

            if test_zero {
                matrix.push(CoverageCell::bit(CellTarget::Flags, bit_pos, 0));
            }
            if test_one {
                matrix.push(CoverageCell::bit(CellTarget::Flags, bit_pos, 1));
            }
        }

        if classified.flags_set_0 & flag != 0 {
            matrix.push(CoverageCell::bit(CellTarget::Flags, bit_pos, 0));
        }
        if classified.flags_set_1 & flag != 0 {
            matrix.push(CoverageCell::bit(CellTarget::Flags, bit_pos, 1));
        }
    }

    for &exception in sem.exceptions {
        matrix.push(CoverageCell::exception(exception));
    }

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use opcheck_isa::{decode, DecodeMode};
    use pretty_assertions::assert_eq;

    fn matrix_for(bytes: &[u8]) -> Vec<CoverageCell> {
        let summary = decode::summarize(DecodeMode::Bits64, 0, bytes).expect("decode");
        let classified = classify(&summary);
        build_matrix(&summary, &classified)
    }

    fn reg_cells(matrix: &[CoverageCell], reg: Register) -> Vec<(u16, u8)> {
        matrix
            .iter()
            .filter(|c| c.target == CellTarget::Reg(reg))
            .map(|c| (c.bit_pos, c.expected_bit))
            .collect()
    }

    fn flag_cells(matrix: &[CoverageCell], flag: u32) -> Vec<u8> {
        matrix
            .iter()
            .filter(|c| c.target == CellTarget::Flags && (1u32 << c.bit_pos) == flag)
            .map(|c| c.expected_bit)
            .collect()
    }

    #[test]
    fn xor_self_prunes_all_one_polarities() {
        // 31 C0 => xor eax, eax
        let matrix = matrix_for(&[0x31, 0xC0]);
        let cells = reg_cells(&matrix, Register::EAX);
        assert_eq!(cells.len(), 32);
        assert!(cells.iter().all(|&(_, bit)| bit == 0));

        // Always-zero result: ZF and PF can only be 1, SF only 0.
        assert_eq!(flag_cells(&matrix, flags::ZF), vec![1]);
        assert_eq!(flag_cells(&matrix, flags::PF), vec![1]);
        assert_eq!(flag_cells(&matrix, flags::SF), vec![0]);
        // CF/OF are forced to zero by XOR.
        assert_eq!(flag_cells(&matrix, flags::CF), vec![0]);
        assert_eq!(flag_cells(&matrix, flags::OF), vec![0]);
        assert_eq!(flag_cells(&matrix, flags::AF), Vec::<u8>::new());
    }

    #[test]
    fn xor_distinct_registers_keeps_both_polarities() {
        // 31 D8 => xor eax, ebx
        let matrix = matrix_for(&[0x31, 0xD8]);
        let cells = reg_cells(&matrix, Register::EAX);
        assert_eq!(cells.len(), 64);
        for bit in 0..32u16 {
            assert!(cells.contains(&(bit, 0)));
            assert!(cells.contains(&(bit, 1)));
        }
        assert_eq!(flag_cells(&matrix, flags::ZF), vec![0, 1]);
    }

    #[test]
    fn mov_immediate_bits_are_fully_determined() {
        // B8 01 00 00 00 => mov eax, 1
        let matrix = matrix_for(&[0xB8, 0x01, 0x00, 0x00, 0x00]);
        let cells = reg_cells(&matrix, Register::EAX);
        assert!(cells.contains(&(0, 1)));
        assert!(!cells.contains(&(0, 0)));
        for bit in 1..32u16 {
            assert!(cells.contains(&(bit, 0)));
            assert!(!cells.contains(&(bit, 1)));
        }
        // No operand-dependent flag cells for an immediate form.
        assert!(matrix.iter().all(|c| c.target != CellTarget::Flags));
    }

    #[test]
    fn and_immediate_masks_high_bits() {
        // 83 E0 0F => and eax, 0x0f
        let matrix = matrix_for(&[0x83, 0xE0, 0x0F]);
        let cells = reg_cells(&matrix, Register::EAX);
        for bit in 0..4u16 {
            assert!(cells.contains(&(bit, 0)));
            assert!(cells.contains(&(bit, 1)));
        }
        for bit in 4..32u16 {
            assert!(cells.contains(&(bit, 0)));
            assert!(!cells.contains(&(bit, 1)));
        }
        // Forced CF/OF zero cells survive the immediate-input pruning.
        assert_eq!(flag_cells(&matrix, flags::CF), vec![0]);
        assert_eq!(flag_cells(&matrix, flags::OF), vec![0]);
        assert_eq!(flag_cells(&matrix, flags::ZF), Vec::<u8>::new());
    }

    #[test]
    fn setcc_is_single_bit() {
        // 0F 94 C0 => sete al
        let matrix = matrix_for(&[0x0F, 0x94, 0xC0]);
        let cells = reg_cells(&matrix, Register::AL);
        assert!(cells.contains(&(0, 0)));
        assert!(cells.contains(&(0, 1)));
        for bit in 1..8u16 {
            assert!(cells.contains(&(bit, 0)));
            assert!(!cells.contains(&(bit, 1)));
        }
    }

    #[test]
    fn lea_self_sum_forces_low_bit_zero() {
        // 48 8D 04 1B => lea rax, [rbx+rbx]
        let matrix = matrix_for(&[0x48, 0x8D, 0x04, 0x1B]);
        let cells = reg_cells(&matrix, Register::RAX);
        assert!(cells.contains(&(0, 0)));
        assert!(!cells.contains(&(0, 1)));
        for bit in 1..64u16 {
            assert!(cells.contains(&(bit, 1)), "bit {bit} one-cell missing");
        }
    }

    #[test]
    fn lea_scaled_index_zeroes_low_bits() {
        // 48 8D 04 9D 00 00 00 00 => lea rax, [rbx*4]
        let matrix = matrix_for(&[0x48, 0x8D, 0x04, 0x9D, 0x00, 0x00, 0x00, 0x00]);
        let cells = reg_cells(&matrix, Register::RAX);
        for bit in 0..2u16 {
            assert!(cells.contains(&(bit, 0)));
            assert!(!cells.contains(&(bit, 1)), "bit {bit} must be zero-only");
        }
        assert!(cells.contains(&(2, 1)));
    }

    #[test]
    fn bswap_narrow_destination_is_zero_only() {
        // 66 0F C8 => bswap ax
        let matrix = matrix_for(&[0x66, 0x0F, 0xC8]);
        let cells = reg_cells(&matrix, Register::AX);
        assert_eq!(cells.len(), 16);
        assert!(cells.iter().all(|&(_, bit)| bit == 0));
    }

    #[test]
    fn bswap_wide_destination_keeps_both_polarities() {
        // 0F C8 => bswap eax
        let matrix = matrix_for(&[0x0F, 0xC8]);
        let cells = reg_cells(&matrix, Register::EAX);
        assert_eq!(cells.len(), 64);
    }

    #[test]
    fn div_appends_exception_cells_last() {
        // 48 F7 F1 => div rcx
        let matrix = matrix_for(&[0x48, 0xF7, 0xF1]);
        let exceptions: Vec<ExceptionKind> = matrix
            .iter()
            .filter(|c| c.is_exception())
            .map(|c| c.exception)
            .collect();
        assert_eq!(
            exceptions,
            vec![ExceptionKind::DivideError, ExceptionKind::IntegerOverflow]
        );
        assert!(matrix[matrix.len() - 2].is_exception());
        assert!(matrix[matrix.len() - 1].is_exception());
        // RAX and RDX both get full bit coverage.
        assert_eq!(reg_cells(&matrix, Register::RAX).len(), 128);
        assert_eq!(reg_cells(&matrix, Register::RDX).len(), 128);
    }

    #[test]
    fn add_self_suppresses_low_one_and_of_one() {
        // 48 01 C0 => add rax, rax
        let matrix = matrix_for(&[0x48, 0x01, 0xC0]);
        let cells = reg_cells(&matrix, Register::RAX);
        assert!(cells.contains(&(0, 0)));
        assert!(!cells.contains(&(0, 1)));
        assert!(cells.contains(&(1, 1)));
        assert_eq!(flag_cells(&matrix, flags::OF), vec![0]);
        assert_eq!(flag_cells(&matrix, flags::CF), vec![0, 1]);
    }

    #[test]
    fn matrix_order_is_regs_then_flags_then_exceptions() {
        let matrix = matrix_for(&[0x48, 0xF7, 0xF1]);
        let mut section = 0;
        for cell in &matrix {
            let this = match cell.target {
                CellTarget::Reg(_) => 0,
                CellTarget::Flags => 1,
                CellTarget::None => 2,
            };
            assert!(this >= section, "matrix sections out of order");
            section = this;
        }
    }
}
