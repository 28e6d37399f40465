//! # Operation faults and the numeric error-code contract.
//!
//! Scheduling servers key their recovery logic on these numeric codes, so
//! the mapping below is frozen: changing a number is a wire-protocol break
//! even though no wire lives in this crate.

use thiserror::Error;

/// Why an operation was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpFault {
    /// The requestor may not perform this operation.
    #[error("not authorised")]
    NotAuthorised,

    /// A session is already active.
    #[error("a session is already active")]
    AlreadyInSession,

    /// The requestor is not the session master.
    #[error("requestor is not the session master")]
    NotMaster,

    /// No session is active.
    #[error("no session is active")]
    NoSession,

    /// The rig is in maintenance or its monitor status is bad.
    #[error("rig is not operable: {0}")]
    NotOperable(String),

    /// No attribute is registered under the requested key.
    #[error("attribute {0} not found")]
    AttributeNotFound(String),

    /// The rig has no batch capability.
    #[error("batch control is not supported")]
    NotSupported,

    /// A batch invocation is already active.
    #[error("a batch invocation is already running")]
    BatchRunning,

    /// A rig action reported failure.
    #[error("action failure: {0}")]
    ActionFailure(String),

    /// An asynchronous job is already executing or queued.
    #[error("an asynchronous job is already in progress")]
    InProgress,

    /// The named user is not a slave in the session.
    #[error("{0} is not a slave user")]
    NotSlave(String),
}

impl OpFault {
    /// Stable numeric code reported to the scheduling server.
    pub fn code(&self) -> u16 {
        match self {
            OpFault::NotAuthorised => 3,
            OpFault::AlreadyInSession => 4,
            OpFault::NotMaster => 5,
            OpFault::NoSession => 6,
            OpFault::NotOperable(_) => 7,
            OpFault::AttributeNotFound(_) => 9,
            OpFault::NotSupported => 10,
            OpFault::BatchRunning => 12,
            OpFault::ActionFailure(_) => 16,
            OpFault::InProgress => 17,
            OpFault::NotSlave(_) => 18,
        }
    }

    pub(crate) fn into_error(self, operation: &'static str) -> OpError {
        OpError {
            code: self.code(),
            operation,
            reason: self.to_string(),
        }
    }
}

/// A refused operation, ready for the transport layer to encode.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{operation} refused with code {code}: {reason}")]
pub struct OpError {
    pub code: u16,
    pub operation: &'static str,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_the_external_contract() {
        assert_eq!(OpFault::NotAuthorised.code(), 3);
        assert_eq!(OpFault::AlreadyInSession.code(), 4);
        assert_eq!(OpFault::NotMaster.code(), 5);
        assert_eq!(OpFault::NoSession.code(), 6);
        assert_eq!(OpFault::NotOperable(String::new()).code(), 7);
        assert_eq!(OpFault::AttributeNotFound(String::new()).code(), 9);
        assert_eq!(OpFault::NotSupported.code(), 10);
        assert_eq!(OpFault::BatchRunning.code(), 12);
        assert_eq!(OpFault::ActionFailure(String::new()).code(), 16);
        assert_eq!(OpFault::InProgress.code(), 17);
        assert_eq!(OpFault::NotSlave(String::new()).code(), 18);
    }

    #[test]
    fn errors_carry_operation_and_code() {
        let err = OpFault::NoSession.into_error("release");
        assert_eq!(err.code, 6);
        assert_eq!(err.operation, "release");
        assert_eq!(err.to_string(), "release refused with code 6: no session is active");
    }
}
