//! # rigvisor
//!
//! **Rigvisor** is a session controller for remote laboratory rigs.
//!
//! It grants one physical apparatus exclusively to one user at a time,
//! layers tiered collaborator access on top, runs pluggable device actions
//! at every session boundary, and supervises long-running batch jobs in a
//! child process. The crate is the rig-side core; the wire protocol that
//! talks to a scheduling server is the host's job.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                         transport layer (host)
//!                                  │
//!                                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  RigOperations (precondition checks + numeric error codes)        │
//! └───────┬───────────────────────┬───────────────────────┬───────────┘
//!         ▼                       ▼                       ▼
//! ┌────────────────┐   ┌──────────────────┐   ┌──────────────────────┐
//! │ Rig            │   │ Coordinator      │   │ BatchControl         │
//! │ (state mutex)  │◄──│ (1 worker,       │   │ (1 invocation,       │
//! │ session map    │   │  queue cap 2)    │   │  startup/abort       │
//! │ maintenance    │   │  callback +      │   │  deadlines)          │
//! │ action registry│   │  rollback        │   └──────────┬───────────┘
//! └───────┬────────┘   └──────────────────┘              ▼
//!         │                                    ┌──────────────────────┐
//!         ▼                                    │ BatchRunner          │
//! ┌────────────────────────────────┐          │ (child process,      │
//! │ capability actions             │          │  piped stdio,        │
//! │ ACCESS / SLAVE_ACCESS / NOTIFY │          │  result files)       │
//! │ RESET / TEST (monitor loops)   │          └──────────────────────┘
//! └────────────────────────────────┘
//! ```
//!
//! ### Session lifecycle
//! ```text
//! allocate(user) ──► stop exerciser tests
//!                ──► AccessAction::assign, in registration order
//!                      ├─ all succeed ─► user is Master
//!                      └─ one fails  ─► record failure, restart tests,
//!                                       refuse (no rollback of earlier
//!                                       actions)
//!
//! add_slave(user) ──► SlaveAccessAction::assign ─► SlaveActive / SlavePassive
//!
//! release() ──► revoke slaves ──► revoke master ──► session cleared
//!           ──► ResetAction::reset ──► restart exerciser tests
//!
//! 3 failures of one action instance ──► rig enters maintenance
//! ```
//!
//! ## Features
//! | Area            | Description                                             | Key types / traits                        |
//! |-----------------|---------------------------------------------------------|-------------------------------------------|
//! | **Sessions**    | Exclusive grant, tiered collaborators, maintenance.     | [`Rig`], [`Role`]                         |
//! | **Actions**     | Pluggable device capabilities per category.             | [`AccessAction`], [`TestAction`], ...     |
//! | **Async jobs**  | Queued allocation and release with server callbacks.    | [`Coordinator`], [`SchedulingCallback`]   |
//! | **Batch**       | Out-of-process jobs with progress and result capture.   | [`BatchControl`], [`ProcessBatchRunner`]  |
//! | **Operations**  | Transport-facing facade with frozen numeric codes.      | [`RigOperations`], [`OpFault`]            |
//! | **Configuration** | Centralized rig and batch settings.                   | [`RigConfig`], [`BatchConfig`]            |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use rigvisor::{AccessAction, Action, Rig, RigConfig};
//!
//! struct RelayBoard;
//!
//! impl Action for RelayBoard {
//!     fn action_type(&self) -> &str { "relay-board" }
//!     fn failure_reason(&self) -> Option<String> { None }
//! }
//!
//! #[async_trait]
//! impl AccessAction for RelayBoard {
//!     async fn assign(&self, _user: &str) -> bool { true }
//!     async fn revoke(&self, _user: &str) -> bool { true }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let rig = Rig::new(RigConfig {
//!         name: "optics-1".into(),
//!         rig_type: "optics".into(),
//!         ..RigConfig::default()
//!     });
//!     rig.register_access(Arc::new(RelayBoard)).await;
//!
//!     assert!(rig.assign("alice").await);
//!     assert!(!rig.assign("bob").await);
//!     assert!(rig.revoke().await);
//! }
//! ```

mod actions;
mod alloc;
mod batch;
mod config;
mod ops;
mod rig;

// ---- Public re-exports ----

pub use actions::{
    AccessAction, AccessRef, Action, ActionCategory, NotifyAction, NotifyRef, ResetAction,
    ResetRef, SlaveAccessAction, SlaveAccessRef, TestAction, TestMonitor, TestRef,
};
pub use alloc::{
    CallbackFault, CallbackRequest, CallbackResponse, Coordinator, JobKind, SchedulingCallback,
    SubmitError,
};
pub use batch::{
    BatchControl, BatchResults, BatchRunner, BatchRunnerFactory, BatchState, ProcessBatchRunner,
    ProcessRunnerFactory, ProgressParser, StdoutTokenProgress,
};
pub use config::{BatchConfig, RigConfig};
pub use ops::{BatchStatus, OpError, OpFault, OpOutcome, Requestor, RigOperations, StatusReport};
pub use rig::{Rig, Role};
