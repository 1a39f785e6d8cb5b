//! Concrete encoding enumeration for a mnemonic.
//!
//! For every opcode table entry matching the mnemonic, this walks a fixed
//! pool of register, immediate and address-form operand choices, asks the
//! encoder for the byte sequence and keeps everything that re-decodes to the
//! same mnemonic. The result is a deterministic, duplicate-free stream of
//! encodings ordered by their bytes.
//!
//! `RSP`/`RBP` are deliberately absent from the register pools: the
//! execution sandbox runs the instruction on the host stack and cannot
//! restore a clobbered stack pointer.

use std::collections::BTreeSet;

use iced_x86::{Code, Encoder, Instruction, MemoryOperand, Mnemonic, OpCodeOperandKind, Register};

use crate::{decode, DecodeMode};

const POOL8: &[Register] = &[Register::AL, Register::BL, Register::AH, Register::CH];
const POOL16: &[Register] = &[Register::AX, Register::BX, Register::CX, Register::DX];
const POOL32: &[Register] = &[Register::EAX, Register::EBX, Register::ECX, Register::EDX];
const POOL64: &[Register] = &[Register::RAX, Register::RBX, Register::RCX, Register::RDX];

const IMM_POOL: &[u64] = &[0, 1, 0x0F, 0x7F];

#[derive(Clone, Copy, Debug)]
struct MemForm {
    base: Register,
    index: Register,
    scale: u32,
    displacement: i64,
    displ_size: u32,
}

/// Address forms used for operands that are a plain memory reference
/// (address computation; the referenced memory is never touched).
const MEM_FORMS: &[MemForm] = &[
    // [rbx]
    MemForm {
        base: Register::RBX,
        index: Register::None,
        scale: 1,
        displacement: 0,
        displ_size: 0,
    },
    // [rbx+rbx*1]
    MemForm {
        base: Register::RBX,
        index: Register::RBX,
        scale: 1,
        displacement: 0,
        displ_size: 0,
    },
    // [rbx*2], [rbx*4], [rbx*8] (no base forces a disp32 of zero)
    MemForm {
        base: Register::None,
        index: Register::RBX,
        scale: 2,
        displacement: 0,
        displ_size: 4,
    },
    MemForm {
        base: Register::None,
        index: Register::RBX,
        scale: 4,
        displacement: 0,
        displ_size: 4,
    },
    MemForm {
        base: Register::None,
        index: Register::RBX,
        scale: 8,
        displacement: 0,
        displ_size: 4,
    },
    // [rbx+0x40]
    MemForm {
        base: Register::RBX,
        index: Register::None,
        scale: 1,
        displacement: 0x40,
        displ_size: 1,
    },
];

#[derive(Clone, Copy, Debug)]
enum OperandChoice {
    Reg(Register),
    Imm(u64),
    Mem(MemForm),
}

fn register_choices(pool: &[Register]) -> Vec<OperandChoice> {
    pool.iter().copied().map(OperandChoice::Reg).collect()
}

fn immediate_choices() -> Vec<OperandChoice> {
    IMM_POOL.iter().copied().map(OperandChoice::Imm).collect()
}

/// Operand choices for one opcode operand slot; `None` means the slot (and
/// therefore the whole opcode) is outside the supported operand universe.
fn choices_for_kind(kind: OpCodeOperandKind) -> Option<Vec<OperandChoice>> {
    type K = OpCodeOperandKind;
    match kind {
        K::al => Some(vec![OperandChoice::Reg(Register::AL)]),
        K::cl => Some(vec![OperandChoice::Reg(Register::CL)]),
        K::ax => Some(vec![OperandChoice::Reg(Register::AX)]),
        K::eax => Some(vec![OperandChoice::Reg(Register::EAX)]),
        K::rax => Some(vec![OperandChoice::Reg(Register::RAX)]),
        K::r8_reg | K::r8_opcode | K::r8_or_mem => Some(register_choices(POOL8)),
        K::r16_reg | K::r16_rm | K::r16_opcode | K::r16_or_mem => Some(register_choices(POOL16)),
        K::r32_reg | K::r32_rm | K::r32_opcode | K::r32_or_mem => Some(register_choices(POOL32)),
        K::r64_reg | K::r64_rm | K::r64_opcode | K::r64_or_mem => Some(register_choices(POOL64)),
        K::imm8
        | K::imm8sex16
        | K::imm8sex32
        | K::imm8sex64
        | K::imm16
        | K::imm32
        | K::imm32sex64
        | K::imm64 => Some(immediate_choices()),
        K::imm8_const_1 => Some(vec![OperandChoice::Imm(1)]),
        K::mem => Some(MEM_FORMS.iter().copied().map(OperandChoice::Mem).collect()),
        _ => None,
    }
}

fn memory_operand(form: MemForm) -> MemoryOperand {
    MemoryOperand::new(
        form.base,
        form.index,
        form.scale,
        form.displacement,
        form.displ_size,
        false,
        Register::None,
    )
}

fn is_imm64_kind(kind: OpCodeOperandKind) -> bool {
    matches!(kind, OpCodeOperandKind::imm64)
}

fn build_instruction(code: Code, choices: &[OperandChoice]) -> Option<Instruction> {
    use OperandChoice::*;
    let op_code = code.op_code();
    match *choices {
        [Reg(a)] => Instruction::with1(code, a).ok(),
        [Imm(a)] => Instruction::with1(code, a as i32).ok(),
        [Mem(a)] => Instruction::with1(code, memory_operand(a)).ok(),
        [Reg(a), Reg(b)] => Instruction::with2(code, a, b).ok(),
        [Reg(a), Imm(b)] => {
            if is_imm64_kind(op_code.op_kind(1)) {
                Instruction::with2(code, a, b).ok()
            } else {
                Instruction::with2(code, a, b as i32).ok()
            }
        }
        [Reg(a), Mem(b)] => Instruction::with2(code, a, memory_operand(b)).ok(),
        [Mem(a), Reg(b)] => Instruction::with2(code, memory_operand(a), b).ok(),
        [Mem(a), Imm(b)] => Instruction::with2(code, memory_operand(a), b as i32).ok(),
        [Reg(a), Reg(b), Imm(c)] => Instruction::with3(code, a, b, c as i32).ok(),
        [Reg(a), Reg(b), Reg(c)] => Instruction::with3(code, a, b, c).ok(),
        _ => None,
    }
}

fn encode(mode: DecodeMode, instruction: &Instruction) -> Option<Vec<u8>> {
    let mut encoder = Encoder::new(mode.bitness());
    encoder.encode(instruction, 0).ok()?;
    Some(encoder.take_buffer())
}

fn mode_supported(mode: DecodeMode, op_code: &iced_x86::OpCodeInfo) -> bool {
    match mode {
        DecodeMode::Bits16 => op_code.mode16(),
        DecodeMode::Bits32 => op_code.mode32(),
        DecodeMode::Bits64 => op_code.mode64(),
    }
}

fn cross_product(slots: &[Vec<OperandChoice>]) -> Vec<Vec<OperandChoice>> {
    let mut combos: Vec<Vec<OperandChoice>> = vec![Vec::new()];
    for slot in slots {
        let mut next = Vec::with_capacity(combos.len() * slot.len());
        for combo in &combos {
            for choice in slot {
                let mut extended = combo.clone();
                extended.push(*choice);
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Enumerate concrete encodings of `mnemonic` in `mode`.
///
/// Every returned byte sequence decodes back to `mnemonic` with no trailing
/// bytes. The result is sorted by bytes and free of duplicates.
pub fn enumerate_mnemonic(mode: DecodeMode, mnemonic: Mnemonic) -> Vec<Vec<u8>> {
    let mut encodings: BTreeSet<Vec<u8>> = BTreeSet::new();

    for code in Code::values() {
        if code.mnemonic() != mnemonic {
            continue;
        }
        let op_code = code.op_code();
        if !op_code.is_instruction() || !mode_supported(mode, op_code) {
            continue;
        }
        let op_count = op_code.op_count() as usize;
        if op_count == 0 || op_count > 3 {
            continue;
        }

        let mut slots = Vec::with_capacity(op_count);
        let mut supported = true;
        for i in 0..op_count {
            match choices_for_kind(op_code.op_kind(i as u32)) {
                Some(choices) => slots.push(choices),
                None => {
                    supported = false;
                    break;
                }
            }
        }
        if !supported {
            continue;
        }

        for combo in cross_product(&slots) {
            let Some(instruction) = build_instruction(code, &combo) else {
                continue;
            };
            let Some(bytes) = encode(mode, &instruction) else {
                continue;
            };
            let round_trips = decode::summarize(mode, 0, &bytes)
                .map(|summary| summary.mnemonic == mnemonic)
                .unwrap_or(false);
            if round_trips {
                encodings.insert(bytes);
            }
        }
    }

    encodings.into_iter().collect()
}
