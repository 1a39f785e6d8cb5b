//! Per-instruction test-vector synthesis.
//!
//! Given one encoded instruction, this crate derives a bit-level coverage
//! matrix from the instruction's operand and flag semantics, drives an
//! adaptive input search against the execution sandbox until every matrix
//! cell is witnessed, and emits a deduplicated, deterministic set of
//! observation records.
//!
//! Pipeline: [`classify`] -> [`matrix`] -> [`search`] -> [`record`] ->
//! [`serialize`], fanned out per encoding by [`orchestrate`].

pub mod classify;
pub mod matrix;
pub mod orchestrate;
pub mod record;
pub mod report;
pub mod search;
pub mod semantics;
pub mod serialize;

use thiserror::Error;

pub use orchestrate::RunConfig;
pub use record::{ExceptionKind, RegSlot, TestEntry, TestGroup};
pub use report::{MnemonicSummary, RunReport};

#[derive(Debug, Error)]
pub enum GenError {
    #[error("decode failed: {0}")]
    Decode(#[from] opcheck_isa::decode::DecodeError),

    #[error("sandbox failure: {0}")]
    Sandbox(#[from] opcheck_exec::ContextError),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
