//! Per-run execution status of the sandbox.

/// What happened when the guest instruction ran once.
///
/// `IllegalInstruction` is a status, not an in-guest exception witness: an
/// encoding the CPU rejects produces no vectors at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    /// `#DE` raised by a zero divisor.
    DivideError,
    /// `#DE` raised by a quotient that does not fit the destination.
    IntegerOverflow,
    /// `#UD`: the host CPU rejected the encoding.
    IllegalInstruction,
    /// The guest touched memory outside the sandbox.
    MemoryFault,
}

impl ExecutionStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}
