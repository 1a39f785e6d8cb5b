//! Observation records and their total order.
//!
//! Register maps are keyed by root registers only; sub-register access is
//! recovered through the register model's byte offsets. `TestEntry` derives
//! its ordering from field declaration order, which is exactly the
//! lexicographic tuple `(input_regs, input_flags, output_regs, output_flags,
//! exception)`. The order is total and deterministic, so sorting plus
//! adjacent dedup yields a canonical entry list.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use opcheck_isa::{regs, Register};

/// In-guest exception witnessed by an entry. Illegal instruction is a
/// sandbox status, never an exception witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExceptionKind {
    None,
    DivideError,
    IntegerOverflow,
}

impl ExceptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionKind::None => "NONE",
            ExceptionKind::DivideError => "INT_DIVIDE_ERROR",
            ExceptionKind::IntegerOverflow => "INT_OVERFLOW",
        }
    }
}

/// Map key wrapper giving root registers a stable total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegSlot(pub Register);

impl RegSlot {
    pub fn name(self) -> String {
        regs::reg_name(self.0)
    }
}

impl Ord for RegSlot {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0 as u32).cmp(&(other.0 as u32))
    }
}

impl PartialOrd for RegSlot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Little-endian register contents, sized to the root register width.
pub type RegBytes = Vec<u8>;

/// One observed input/output vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TestEntry {
    pub input_regs: BTreeMap<RegSlot, RegBytes>,
    pub input_flags: Option<u32>,
    pub output_regs: BTreeMap<RegSlot, RegBytes>,
    pub output_flags: Option<u32>,
    pub exception: Option<ExceptionKind>,
}

/// All vectors observed for one encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestGroup {
    pub address: u64,
    pub bytes: Vec<u8>,
    /// Decoded effective operand width; the orchestrator's sort key.
    pub operand_width: u16,
    pub entries: Vec<TestEntry>,
    pub illegal: bool,
}

impl TestGroup {
    /// Freeze the group: canonical entry order, adjacent duplicates removed.
    pub fn finalize(&mut self) {
        self.entries.sort();
        self.entries.dedup();
    }

    /// A group reaches the serializer only if it produced vectors and the
    /// encoding was not rejected by the CPU.
    pub fn is_publishable(&self) -> bool {
        !self.illegal && !self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry_with_rax(value: u8) -> TestEntry {
        let mut entry = TestEntry::default();
        let mut bytes = vec![0u8; 8];
        bytes[0] = value;
        entry.input_regs.insert(RegSlot(Register::RAX), bytes);
        entry
    }

    #[test]
    fn order_is_lexicographic_over_fields() {
        let a = entry_with_rax(1);
        let b = entry_with_rax(2);
        assert!(a < b);

        let mut c = entry_with_rax(1);
        c.input_flags = Some(0);
        // Same regs, flags present vs absent: None sorts first.
        assert!(a < c);

        let mut d = entry_with_rax(1);
        d.exception = Some(ExceptionKind::DivideError);
        assert!(a < d);
    }

    #[test]
    fn finalize_sorts_and_dedups() {
        let mut group = TestGroup {
            address: 0x1000,
            bytes: vec![0x90],
            operand_width: 32,
            entries: vec![entry_with_rax(2), entry_with_rax(1), entry_with_rax(2)],
            illegal: false,
        };
        group.finalize();
        assert_eq!(
            group.entries,
            vec![entry_with_rax(1), entry_with_rax(2)]
        );
        assert!(group.is_publishable());
    }

    #[test]
    fn finalized_entries_are_strictly_ascending() {
        let mut group = TestGroup {
            address: 0,
            bytes: vec![0x90],
            operand_width: 8,
            entries: (0..32).rev().map(|i| entry_with_rax(i % 8)).collect(),
            illegal: false,
        };
        group.finalize();
        for pair in group.entries.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn illegal_or_empty_groups_are_not_publishable() {
        let empty = TestGroup {
            address: 0,
            bytes: vec![0x90],
            operand_width: 8,
            entries: Vec::new(),
            illegal: false,
        };
        assert!(!empty.is_publishable());

        let illegal = TestGroup {
            address: 0,
            bytes: vec![0x0F, 0x0B],
            operand_width: 8,
            entries: vec![entry_with_rax(1)],
            illegal: true,
        };
        assert!(!illegal.is_publishable());
    }

    #[test]
    fn reg_slot_orders_by_register_id() {
        let mut slots = vec![
            RegSlot(Register::RDX),
            RegSlot(Register::RAX),
            RegSlot(Register::RCX),
        ];
        slots.sort();
        assert_eq!(
            slots,
            vec![
                RegSlot(Register::RAX),
                RegSlot(Register::RCX),
                RegSlot(Register::RDX),
            ]
        );
    }

    #[test]
    fn exception_strings() {
        assert_eq!(ExceptionKind::None.as_str(), "NONE");
        assert_eq!(ExceptionKind::DivideError.as_str(), "INT_DIVIDE_ERROR");
        assert_eq!(ExceptionKind::IntegerOverflow.as_str(), "INT_OVERFLOW");
    }
}
