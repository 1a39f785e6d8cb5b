//! Property tests for the observation-record total order.

use opcheck_gen::{ExceptionKind, RegSlot, TestEntry, TestGroup};
use opcheck_isa::Register;
use proptest::prelude::*;

fn any_exception() -> impl Strategy<Value = Option<ExceptionKind>> {
    prop_oneof![
        Just(None),
        Just(Some(ExceptionKind::None)),
        Just(Some(ExceptionKind::DivideError)),
        Just(Some(ExceptionKind::IntegerOverflow)),
    ]
}

fn any_entry() -> impl Strategy<Value = TestEntry> {
    (
        proptest::collection::vec(any::<u8>(), 8),
        proptest::option::of(any::<u32>()),
        proptest::collection::vec(any::<u8>(), 8),
        proptest::option::of(any::<u32>()),
        any_exception(),
    )
        .prop_map(|(input, input_flags, output, output_flags, exception)| {
            let mut entry = TestEntry::default();
            entry.input_regs.insert(RegSlot(Register::RAX), input);
            entry.input_flags = input_flags;
            entry.output_regs.insert(RegSlot(Register::RAX), output);
            entry.output_flags = output_flags;
            entry.exception = exception;
            entry
        })
}

proptest! {
    #[test]
    fn finalize_yields_strictly_ascending_entries(
        entries in proptest::collection::vec(any_entry(), 0..32)
    ) {
        let mut group = TestGroup {
            address: 0x1000,
            bytes: vec![0x90],
            operand_width: 64,
            entries,
            illegal: false,
        };
        group.finalize();
        for pair in group.entries.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn finalize_is_idempotent(
        entries in proptest::collection::vec(any_entry(), 0..32)
    ) {
        let mut group = TestGroup {
            address: 0,
            bytes: vec![0x90],
            operand_width: 8,
            entries,
            illegal: false,
        };
        group.finalize();
        let once = group.entries.clone();
        group.finalize();
        prop_assert_eq!(once, group.entries);
    }

    #[test]
    fn order_is_total_and_antisymmetric(a in any_entry(), b in any_entry()) {
        use std::cmp::Ordering;
        match a.cmp(&b) {
            Ordering::Less => prop_assert_eq!(b.cmp(&a), Ordering::Greater),
            Ordering::Greater => prop_assert_eq!(b.cmp(&a), Ordering::Less),
            Ordering::Equal => prop_assert_eq!(&a, &b),
        }
    }
}
