//! Asynchronous allocation: the scheduling-callback port and the
//! single-worker job coordinator.

mod callback;
mod coordinator;

pub use callback::{CallbackFault, CallbackRequest, CallbackResponse, SchedulingCallback};
pub use coordinator::{Coordinator, JobKind, SubmitError};
