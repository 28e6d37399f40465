//! # Scheduling-server callback port.
//!
//! Asynchronous allocation and release report their outcome back to the
//! scheduling authority through this port. The host supplies the transport
//! (SOAP, HTTP, a test double); the coordinator only cares about the shapes
//! below.

use async_trait::async_trait;
use thiserror::Error;

/// Outcome report sent to the scheduling server after an async job.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    /// Name of the rig the job ran on.
    pub rig: String,
    /// Whether the job succeeded on this side.
    pub success: bool,
    /// Error payload when `success` is false: a stable numeric code and a
    /// human-readable reason.
    pub error: Option<(u16, String)>,
}

/// Scheduling server's acknowledgement of a callback.
#[derive(Debug, Clone)]
pub struct CallbackResponse {
    /// Whether the server accepted the outcome.
    pub successful: bool,
    /// Server-side reason when it did not.
    pub error_reason: Option<String>,
}

/// Infrastructure failure while delivering a callback.
#[derive(Debug, Error)]
pub enum CallbackFault {
    /// The callback never reached the scheduling server.
    #[error("callback transport failed: {0}")]
    Transport(String),
}

/// Delivery port for scheduling-server callbacks.
#[async_trait]
pub trait SchedulingCallback: Send + Sync + 'static {
    /// Reports the outcome of an asynchronous allocation.
    async fn allocate_callback(
        &self,
        request: CallbackRequest,
    ) -> Result<CallbackResponse, CallbackFault>;

    /// Reports the outcome of an asynchronous release.
    async fn release_callback(
        &self,
        request: CallbackRequest,
    ) -> Result<CallbackResponse, CallbackFault>;
}
