//! Per-mnemonic semantic rules, expressed as data.
//!
//! The coverage-matrix builder consults this table to prune bit polarities
//! that an instruction's semantics make unreachable (e.g. `XOR r, r` can
//! never produce a 1 bit). Rules are predicates over the decoded operand
//! view, not inline special cases, so adding a mnemonic is one table entry.

use opcheck_isa::Mnemonic;

use crate::record::ExceptionKind;

/// When is the full result forced to zero?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultZeroRule {
    Never,
    /// Destination and source name the same register (`SUB/CMP/XOR r, r`).
    DstEqSrc,
    /// The right-hand operand is immediate zero (`AND/TEST/MOV r, 0`).
    RhsZeroImm,
    /// Destination width <= 16 bits (`BSWAP r16` clears the register).
    NarrowDest,
}

/// When is the lowest result bit forced to zero?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstBitZeroRule {
    Never,
    /// `ADD r, r`: doubling shifts the low bit out.
    DstEqSrc,
    /// `LEA r, [b+b*1+0]`: the address doubles the base.
    SelfScaledSum,
}

/// Upper bound on result bits that can become 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxBitsRule {
    DestWidth,
    /// `SETcc` writes 0 or 1.
    One,
    /// `LEA` results are capped by the effective address width.
    AddressWidth,
}

/// Bit-level refinement when the right-hand operand is an immediate `K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmBitRule {
    None,
    /// Output bits mirror `K` exactly (`MOV`).
    Mirror,
    /// A 1 in `K` forces the output bit to 1 (`OR`).
    StickyOnes,
    /// A 0 in `K` forces the output bit to 0 (`AND`).
    StickyZeros,
    /// The bit selected by `K mod width` is forced to 0 (`BTR`).
    ClearedBit,
}

#[derive(Debug, Clone, Copy)]
pub struct Semantics {
    pub result_zero: ResultZeroRule,
    pub first_bit_zero: FirstBitZeroRule,
    pub max_bits: MaxBitsRule,
    pub imm_rule: ImmBitRule,
    /// `LEA r, [index*scale]` with no base: the low `log2(scale)` bits are 0.
    pub scale_zeroes_low_bits: bool,
    /// Exceptions the mnemonic may raise; each gets a coverage cell.
    pub exceptions: &'static [ExceptionKind],
}

const DEFAULT: Semantics = Semantics {
    result_zero: ResultZeroRule::Never,
    first_bit_zero: FirstBitZeroRule::Never,
    max_bits: MaxBitsRule::DestWidth,
    imm_rule: ImmBitRule::None,
    scale_zeroes_low_bits: false,
    exceptions: &[],
};

const ZERO_ON_SELF: Semantics = Semantics {
    result_zero: ResultZeroRule::DstEqSrc,
    ..DEFAULT
};

const ZERO_ON_RHS_ZERO: Semantics = Semantics {
    result_zero: ResultZeroRule::RhsZeroImm,
    ..DEFAULT
};

const SETCC: Semantics = Semantics {
    max_bits: MaxBitsRule::One,
    ..DEFAULT
};

const DIVIDE: Semantics = Semantics {
    exceptions: &[ExceptionKind::DivideError, ExceptionKind::IntegerOverflow],
    ..DEFAULT
};

const TABLE: &[(Mnemonic, Semantics)] = &[
    (Mnemonic::Sub, ZERO_ON_SELF),
    (Mnemonic::Cmp, ZERO_ON_SELF),
    (Mnemonic::Xor, ZERO_ON_SELF),
    (
        Mnemonic::And,
        Semantics {
            result_zero: ResultZeroRule::RhsZeroImm,
            imm_rule: ImmBitRule::StickyZeros,
            ..DEFAULT
        },
    ),
    (Mnemonic::Test, ZERO_ON_RHS_ZERO),
    (
        Mnemonic::Mov,
        Semantics {
            result_zero: ResultZeroRule::RhsZeroImm,
            imm_rule: ImmBitRule::Mirror,
            ..DEFAULT
        },
    ),
    (
        Mnemonic::Or,
        Semantics {
            imm_rule: ImmBitRule::StickyOnes,
            ..DEFAULT
        },
    ),
    (
        Mnemonic::Add,
        Semantics {
            first_bit_zero: FirstBitZeroRule::DstEqSrc,
            ..DEFAULT
        },
    ),
    (
        Mnemonic::Lea,
        Semantics {
            first_bit_zero: FirstBitZeroRule::SelfScaledSum,
            max_bits: MaxBitsRule::AddressWidth,
            scale_zeroes_low_bits: true,
            ..DEFAULT
        },
    ),
    (
        Mnemonic::Bswap,
        Semantics {
            result_zero: ResultZeroRule::NarrowDest,
            ..DEFAULT
        },
    ),
    (
        Mnemonic::Btr,
        Semantics {
            imm_rule: ImmBitRule::ClearedBit,
            ..DEFAULT
        },
    ),
    (Mnemonic::Div, DIVIDE),
    (Mnemonic::Idiv, DIVIDE),
    (Mnemonic::Seta, SETCC),
    (Mnemonic::Setae, SETCC),
    (Mnemonic::Setb, SETCC),
    (Mnemonic::Setbe, SETCC),
    (Mnemonic::Sete, SETCC),
    (Mnemonic::Setg, SETCC),
    (Mnemonic::Setge, SETCC),
    (Mnemonic::Setl, SETCC),
    (Mnemonic::Setle, SETCC),
    (Mnemonic::Setne, SETCC),
    (Mnemonic::Setno, SETCC),
    (Mnemonic::Setnp, SETCC),
    (Mnemonic::Setns, SETCC),
    (Mnemonic::Seto, SETCC),
    (Mnemonic::Setp, SETCC),
    (Mnemonic::Sets, SETCC),
];

/// Rules for `mnemonic`; mnemonics without special semantics get the
/// default (both polarities of every destination bit are considered
/// reachable).
pub fn semantics_for(mnemonic: Mnemonic) -> Semantics {
    TABLE
        .iter()
        .find(|(m, _)| *m == mnemonic)
        .map(|(_, sem)| *sem)
        .unwrap_or(DEFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_apply_to_unlisted_mnemonics() {
        let sem = semantics_for(Mnemonic::Adc);
        assert_eq!(sem.result_zero, ResultZeroRule::Never);
        assert_eq!(sem.max_bits, MaxBitsRule::DestWidth);
        assert!(sem.exceptions.is_empty());
    }

    #[test]
    fn xor_is_zero_on_self() {
        assert_eq!(
            semantics_for(Mnemonic::Xor).result_zero,
            ResultZeroRule::DstEqSrc
        );
    }

    #[test]
    fn setcc_family_is_single_bit() {
        for m in [Mnemonic::Sete, Mnemonic::Setno, Mnemonic::Sets] {
            assert_eq!(semantics_for(m).max_bits, MaxBitsRule::One);
        }
    }

    #[test]
    fn divide_raises_both_exceptions() {
        let sem = semantics_for(Mnemonic::Div);
        assert_eq!(
            sem.exceptions,
            &[ExceptionKind::DivideError, ExceptionKind::IntegerOverflow]
        );
    }

    #[test]
    fn lea_rules() {
        let sem = semantics_for(Mnemonic::Lea);
        assert_eq!(sem.max_bits, MaxBitsRule::AddressWidth);
        assert!(sem.scale_zeroes_low_bits);
        assert_eq!(sem.first_bit_zero, FirstBitZeroRule::SelfScaledSum);
    }
}
