//! x86-64 instruction model for the opcheck test-vector generator.
//!
//! This crate wraps [`iced_x86`] behind a small, stable API:
//!
//! - [`decode`]: decode one instruction and summarize its operands,
//!   widths and flag effects.
//! - [`regs`]: the register model (root registers, widths, byte offsets,
//!   canonical names).
//! - [`flags`]: architectural RFLAGS bit masks and translation from the
//!   decoder's internal flag representation.
//! - [`enumerate`]: concrete encoding enumeration for a mnemonic.
//!
//! The backend is [`iced_x86`], which is table-driven and widely used. We
//! wrap it so the rest of the workspace never depends on its exact API
//! surface.

pub mod decode;
pub mod enumerate;
pub mod flags;
pub mod regs;

/// Decoded instruction type (re-exported from `iced-x86`).
pub use iced_x86::Instruction;
/// Mnemonic enum (re-exported from `iced-x86`).
pub use iced_x86::Mnemonic;
/// Register enum (re-exported from `iced-x86`).
pub use iced_x86::Register;

/// Maximum architectural x86 instruction length.
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// Decode mode/bitness.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DecodeMode {
    /// 16-bit mode.
    Bits16,
    /// 32-bit mode.
    Bits32,
    /// 64-bit long mode.
    Bits64,
}

impl DecodeMode {
    #[inline]
    pub fn bitness(self) -> u32 {
        match self {
            DecodeMode::Bits16 => 16,
            DecodeMode::Bits32 => 32,
            DecodeMode::Bits64 => 64,
        }
    }
}

/// Canonical lowercase mnemonic string, e.g. `xor`.
pub fn mnemonic_name(mnemonic: Mnemonic) -> String {
    format!("{mnemonic:?}").to_ascii_lowercase()
}
