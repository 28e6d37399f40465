//! Produced operations: the transport-facing facade and the frozen numeric
//! error-code contract.

mod core;
mod error;

pub use core::{BatchStatus, OpOutcome, Requestor, RigOperations, StatusReport};
pub use error::{OpError, OpFault};
