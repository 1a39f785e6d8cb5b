//! Register model.
//!
//! Architectural registers are modeled as views into their *root* (largest
//! enclosing) register: all storage lives at the root, a view is
//! `{root, byte offset, width}`. The high-byte registers `AH..DH` sit at
//! byte offset 1 of their qword root; everything else starts at offset 0.

use iced_x86::Register;

/// Registers that are never treated as an input or output of interest:
/// instruction-pointer variants and the pseudo "none" register. The flags
/// register is not part of [`Register`] and is modeled separately.
pub fn is_filtered(reg: Register) -> bool {
    matches!(reg, Register::None | Register::EIP | Register::RIP)
}

/// Largest enclosing architectural register.
///
/// For general-purpose registers in 64-bit mode this is the qword register
/// (`AL`/`AH`/`AX`/`EAX` all map to `RAX`); anything else maps to itself.
pub fn root_reg(reg: Register) -> Register {
    if reg.is_gpr() {
        reg.full_register()
    } else {
        reg
    }
}

/// Register width in bits.
pub fn width_bits(reg: Register) -> u16 {
    (reg.size() * 8) as u16
}

/// Register width in bytes.
pub fn width_bytes(reg: Register) -> usize {
    reg.size()
}

/// Byte offset of a register view inside its root register.
///
/// 1 for the high-byte registers, 0 otherwise. Sub-register writes are
/// always staged inside the root buffer at this offset.
pub fn byte_offset(reg: Register) -> usize {
    match reg {
        Register::AH | Register::BH | Register::CH | Register::DH => 1,
        _ => 0,
    }
}

/// Remap high-byte registers to their word counterpart so downstream
/// indexing sees a contiguous low-offset view (`AH -> AX`, ...).
pub fn remap_high_byte(reg: Register) -> Register {
    match reg {
        Register::AH => Register::AX,
        Register::BH => Register::BX,
        Register::CH => Register::CX,
        Register::DH => Register::DX,
        _ => reg,
    }
}

/// Sort contract used throughout the generator: wider registers first,
/// ties broken by register id so the order is total and deterministic.
pub fn sort_widest_first(regs: &mut [Register]) {
    regs.sort_by(|a, b| {
        width_bits(*b)
            .cmp(&width_bits(*a))
            .then_with(|| (*a as u32).cmp(&(*b as u32)))
    });
}

/// Canonical uppercase register string, e.g. `RAX`.
pub fn reg_name(reg: Register) -> String {
    format!("{reg:?}").to_ascii_uppercase()
}
