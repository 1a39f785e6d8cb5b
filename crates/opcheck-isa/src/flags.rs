//! Architectural RFLAGS bit masks.
//!
//! All flag bitmaps handed out by this crate use the architectural layout
//! (bit 0 = CF, bit 11 = OF, ...). `iced-x86` reports flag effects in its
//! own compact `RflagsBits` layout; [`arch_from_rflags_bits`] translates.

use iced_x86::RflagsBits;

pub const CF: u32 = 1 << 0;
/// Bit 1 always reads as 1.
pub const FIXED_1: u32 = 1 << 1;
pub const PF: u32 = 1 << 2;
pub const AF: u32 = 1 << 4;
pub const ZF: u32 = 1 << 6;
pub const SF: u32 = 1 << 7;
pub const TF: u32 = 1 << 8;
pub const IF: u32 = 1 << 9;
pub const DF: u32 = 1 << 10;
pub const OF: u32 = 1 << 11;
pub const AC: u32 = 1 << 18;

/// The arithmetic status flags.
pub const STATUS: u32 = CF | PF | AF | ZF | SF | OF;

const TRANSLATION: &[(u32, u32)] = &[
    (RflagsBits::CF, CF),
    (RflagsBits::PF, PF),
    (RflagsBits::AF, AF),
    (RflagsBits::ZF, ZF),
    (RflagsBits::SF, SF),
    (RflagsBits::OF, OF),
    (RflagsBits::DF, DF),
    (RflagsBits::IF, IF),
    (RflagsBits::AC, AC),
];

/// Translate an `iced-x86` `RflagsBits` mask into the architectural layout.
///
/// Bits without an architectural counterpart in the low 32 (x87 condition
/// codes, UIF) are dropped.
pub fn arch_from_rflags_bits(iced_mask: u32) -> u32 {
    let mut out = 0;
    for &(from, to) in TRANSLATION {
        if iced_mask & from != 0 {
            out |= to;
        }
    }
    out
}

/// Short name of a single architectural flag bit, for diagnostics.
pub fn flag_name(bit_pos: u16) -> &'static str {
    match 1u32 << bit_pos {
        CF => "CF",
        PF => "PF",
        AF => "AF",
        ZF => "ZF",
        SF => "SF",
        TF => "TF",
        IF => "IF",
        DF => "DF",
        OF => "OF",
        AC => "AC",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn masks_sit_at_architectural_positions() {
        assert_eq!(CF, 0x0001);
        assert_eq!(PF, 0x0004);
        assert_eq!(AF, 0x0010);
        assert_eq!(ZF, 0x0040);
        assert_eq!(SF, 0x0080);
        assert_eq!(OF, 0x0800);
    }

    #[test]
    fn translation_covers_status_flags() {
        let iced = RflagsBits::CF | RflagsBits::ZF | RflagsBits::OF;
        assert_eq!(arch_from_rflags_bits(iced), CF | ZF | OF);
    }

    #[test]
    fn translation_drops_x87_condition_codes() {
        assert_eq!(arch_from_rflags_bits(RflagsBits::C0), 0);
        assert_eq!(arch_from_rflags_bits(RflagsBits::C2), 0);
    }

    #[test]
    fn flag_names() {
        assert_eq!(flag_name(0), "CF");
        assert_eq!(flag_name(6), "ZF");
        assert_eq!(flag_name(11), "OF");
        assert_eq!(flag_name(20), "?");
    }
}
