//! Execution side of the opcheck pipeline.
//!
//! - [`context::ScopedContext`] loads one instruction into an executable
//!   page and runs it natively under a controlled register file, reporting
//!   an [`status::ExecutionStatus`] per run.
//! - [`inputgen::InputGenerator`] is the stateful, seeded source of
//!   register-width byte patterns driving the input search.
//! - [`prng::XorShift64`] is the deterministic PRNG everything is seeded
//!   from.
//!
//! Native execution requires an `x86_64` unix host; on other targets the
//! sandbox reports [`context::ContextError::UnsupportedHost`].

pub mod context;
pub mod inputgen;
pub mod prng;
mod signals;
pub mod status;

pub use context::{ContextError, ScopedContext};
pub use inputgen::InputGenerator;
pub use prng::XorShift64;
pub use status::ExecutionStatus;
