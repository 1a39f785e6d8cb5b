//! One-instruction decoding and summarization.
//!
//! [`summarize`] decodes a single instruction and flattens everything the
//! generator needs out of the decoder tables: the explicit operand list with
//! read/write actions, implicitly accessed general-purpose registers, the
//! effective operand/address widths and the flag-effect bitmaps in
//! architectural layout.

use iced_x86::{
    Decoder, DecoderOptions, Formatter, Instruction, InstructionInfoFactory, IntelFormatter,
    Mnemonic, OpAccess, OpKind, Register,
};
use thiserror::Error;

use crate::{flags, regs, DecodeMode, MAX_INSTRUCTION_LEN};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty instruction")]
    Empty,

    #[error("instruction longer than {MAX_INSTRUCTION_LEN} bytes")]
    TooLong,

    #[error("bytes do not decode as an instruction in {0:?}")]
    Invalid(DecodeMode),

    #[error("trailing bytes after a {0}-byte instruction")]
    TrailingBytes(usize),
}

/// A decoded memory operand reference (address registers only; the memory
/// contents are out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    pub base: Register,
    pub index: Register,
    pub scale: u32,
    pub displacement: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register(Register),
    Memory(MemRef),
    Immediate { signed: i64, unsigned: u64 },
    Other,
}

/// One explicit operand with its decoded access actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandView {
    pub kind: OperandKind,
    pub read: bool,
    pub write: bool,
}

impl OperandView {
    pub fn register(&self) -> Option<Register> {
        match self.kind {
            OperandKind::Register(reg) => Some(reg),
            _ => None,
        }
    }

    pub fn memory(&self) -> Option<MemRef> {
        match self.kind {
            OperandKind::Memory(mem) => Some(mem),
            _ => None,
        }
    }

    pub fn immediate(&self) -> Option<u64> {
        match self.kind {
            OperandKind::Immediate { unsigned, .. } => Some(unsigned),
            _ => None,
        }
    }
}

/// A general-purpose register accessed outside the explicit operand list
/// (e.g. `RAX`/`RDX` for `DIV`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegAccess {
    pub reg: Register,
    pub read: bool,
    pub write: bool,
}

/// Flag-effect bitmaps, architectural layout (see [`crate::flags`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagEffects {
    /// Flags written with an operand-dependent value.
    pub modified: u32,
    /// Flags unconditionally cleared.
    pub set_0: u32,
    /// Flags unconditionally set.
    pub set_1: u32,
    /// Flags read by the instruction.
    pub tested: u32,
}

/// Everything the generator needs to know about one decoded instruction.
#[derive(Debug, Clone)]
pub struct InstrSummary {
    pub instruction: Instruction,
    pub mnemonic: Mnemonic,
    pub mode: DecodeMode,
    /// Effective address width in bits.
    pub address_width: u16,
    /// Effective operand width in bits; the C5 sort key.
    pub operand_width: u16,
    pub operands: Vec<OperandView>,
    pub implicit_regs: Vec<RegAccess>,
    pub flags: FlagEffects,
}

impl InstrSummary {
    pub fn len(&self) -> usize {
        self.instruction.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruction.len() == 0
    }

    /// True iff any explicit operand is an immediate.
    pub fn has_immediate_operand(&self) -> bool {
        self.operands
            .iter()
            .any(|op| matches!(op.kind, OperandKind::Immediate { .. }))
    }
}

fn access_actions(access: OpAccess) -> (bool, bool) {
    match access {
        OpAccess::Read | OpAccess::CondRead => (true, false),
        OpAccess::Write | OpAccess::CondWrite => (false, true),
        OpAccess::ReadWrite | OpAccess::ReadCondWrite => (true, true),
        _ => (false, false),
    }
}

/// Decode exactly one instruction from `bytes` at `ip` and summarize it.
pub fn summarize(mode: DecodeMode, ip: u64, bytes: &[u8]) -> Result<InstrSummary, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() > MAX_INSTRUCTION_LEN {
        return Err(DecodeError::TooLong);
    }

    let mut decoder = Decoder::with_ip(mode.bitness(), bytes, ip, DecoderOptions::NONE);
    let instruction = decoder.decode();
    if instruction.is_invalid() {
        return Err(DecodeError::Invalid(mode));
    }
    if instruction.len() != bytes.len() {
        return Err(DecodeError::TrailingBytes(instruction.len()));
    }

    let mut factory = InstructionInfoFactory::new();
    let info = factory.info(&instruction);

    let mut operands = Vec::with_capacity(instruction.op_count() as usize);
    for i in 0..instruction.op_count() {
        let kind = match instruction.op_kind(i) {
            OpKind::Register => OperandKind::Register(instruction.op_register(i)),
            OpKind::Memory => OperandKind::Memory(MemRef {
                base: instruction.memory_base(),
                index: instruction.memory_index(),
                scale: instruction.memory_index_scale(),
                displacement: instruction.memory_displacement64() as i64,
            }),
            OpKind::Immediate8
            | OpKind::Immediate8_2nd
            | OpKind::Immediate16
            | OpKind::Immediate32
            | OpKind::Immediate64
            | OpKind::Immediate8to16
            | OpKind::Immediate8to32
            | OpKind::Immediate8to64
            | OpKind::Immediate32to64 => {
                let unsigned = instruction.immediate(i);
                OperandKind::Immediate {
                    signed: unsigned as i64,
                    unsigned,
                }
            }
            _ => OperandKind::Other,
        };
        let (read, write) = access_actions(info.op_access(i));
        operands.push(OperandView { kind, read, write });
    }

    // Registers touched outside the explicit operand list. Only GPRs matter
    // here; segment bases and the like are not inputs of interest.
    let mut implicit_regs = Vec::new();
    for used in info.used_registers() {
        let reg = used.register();
        if !reg.is_gpr() {
            continue;
        }
        let explicit = operands.iter().any(|op| match op.kind {
            OperandKind::Register(r) => r == reg,
            OperandKind::Memory(mem) => mem.base == reg || mem.index == reg,
            _ => false,
        });
        if explicit {
            continue;
        }
        let (read, write) = access_actions(used.access());
        if read || write {
            implicit_regs.push(RegAccess { reg, read, write });
        }
    }
    // used_registers() order is not part of the decoder contract.
    implicit_regs.sort_by_key(|acc| acc.reg as u32);

    let flags = FlagEffects {
        modified: flags::arch_from_rflags_bits(instruction.rflags_written()),
        set_0: flags::arch_from_rflags_bits(instruction.rflags_cleared()),
        set_1: flags::arch_from_rflags_bits(instruction.rflags_set()),
        tested: flags::arch_from_rflags_bits(instruction.rflags_read()),
    };

    let address_width = operands
        .iter()
        .find_map(|op| op.memory())
        .and_then(|mem| {
            let addr_reg = if mem.base != Register::None {
                mem.base
            } else {
                mem.index
            };
            (addr_reg != Register::None).then(|| regs::width_bits(addr_reg))
        })
        .unwrap_or(mode.bitness() as u16);

    let operand_width = operands
        .iter()
        .find_map(|op| op.register())
        .map(regs::width_bits)
        .unwrap_or(mode.bitness() as u16);

    Ok(InstrSummary {
        instruction,
        mnemonic: instruction.mnemonic(),
        mode,
        address_width,
        operand_width,
        operands,
        implicit_regs,
        flags,
    })
}

/// Canonical disassembly text for a decoded instruction.
pub fn disassemble(instruction: &Instruction) -> String {
    let mut formatter = IntelFormatter::new();
    let mut out = String::new();
    formatter.format(instruction, &mut out);
    out
}
