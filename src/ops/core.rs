//! # Rig operations facade.
//!
//! [`RigOperations`] is what the transport layer calls after decoding a
//! request: every operation checks its preconditions in a fixed order,
//! refuses with a stable numeric code ([`OpFault::code`]), and otherwise
//! delegates to the session controller, the allocation coordinator, or the
//! batch controller.
//!
//! ```text
//!   transport --> RigOperations --+--> Rig            (sessions)
//!                                 +--> Coordinator    (async jobs)
//!                                 `--> BatchControl   (batch jobs)
//! ```
//!
//! The precondition order is part of the contract: a request that is both
//! unauthorised and targeted at a missing session must report the
//! authorisation code, because callers key their retries on it.

use std::path::PathBuf;
use std::sync::Arc;

use crate::actions::ActionCategory;
use crate::alloc::Coordinator;
use crate::batch::{BatchControl, BatchResults, BatchState};
use crate::ops::error::{OpError, OpFault};
use crate::rig::{Rig, Role};

/// Who is asking.
///
/// `Scheduler` is the transport-authenticated scheduling authority;
/// end-user identity checks use the session tier of the named user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requestor {
    Scheduler,
    User(String),
}

impl Requestor {
    fn user(&self) -> Option<&str> {
        match self {
            Requestor::Scheduler => None,
            Requestor::User(name) => Some(name),
        }
    }
}

/// Successful operation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpOutcome {
    /// The outcome will additionally arrive through the scheduling
    /// callback once the background job finishes.
    pub will_callback: bool,
}

impl OpOutcome {
    fn done() -> Self {
        Self {
            will_callback: false,
        }
    }

    fn pending() -> Self {
        Self {
            will_callback: true,
        }
    }
}

/// Rig health and session summary.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub in_maintenance: bool,
    pub maintenance_reason: Option<String>,
    pub monitor_good: bool,
    pub monitor_reason: Option<String>,
    pub session_active: bool,
    pub session_users: Vec<String>,
}

/// Batch state summary for status polling.
#[derive(Debug, Clone)]
pub struct BatchStatus {
    pub state: BatchState,
    pub progress: i32,
    pub results: BatchResults,
}

/// The operations surface the transport layer drives.
pub struct RigOperations {
    rig: Arc<Rig>,
    coordinator: Arc<Coordinator>,
    batch: Option<Arc<BatchControl>>,
}

impl RigOperations {
    pub fn new(rig: Arc<Rig>, coordinator: Arc<Coordinator>) -> Self {
        Self {
            rig,
            coordinator,
            batch: None,
        }
    }

    /// Adds batch capability; without it batch operations report
    /// NOT_SUPPORTED.
    pub fn with_batch(mut self, batch: Arc<BatchControl>) -> Self {
        self.batch = Some(batch);
        self
    }

    // --- session allocation ----------------------------------------------

    /// Grants the rig to `user` on behalf of the scheduling server.
    pub async fn allocate(
        &self,
        user: &str,
        is_async: bool,
        requestor: &Requestor,
    ) -> Result<OpOutcome, OpError> {
        const OP: &str = "allocate";
        if *requestor != Requestor::Scheduler {
            return Err(OpFault::NotAuthorised.into_error(OP));
        }
        if self.rig.is_session_active().await {
            return Err(OpFault::AlreadyInSession.into_error(OP));
        }
        if !self.rig.is_monitor_status_good().await {
            let why = self
                .rig
                .monitor_reason()
                .await
                .unwrap_or_else(|| String::from("monitor status is bad"));
            return Err(OpFault::NotOperable(why).into_error(OP));
        }

        if is_async {
            match self.coordinator.submit_allocate(user) {
                Ok(()) => Ok(OpOutcome::pending()),
                Err(_) => Err(OpFault::InProgress.into_error(OP)),
            }
        } else if self.rig.assign(user).await {
            Ok(OpOutcome::done())
        } else {
            Err(self.action_failure(ActionCategory::Access).await.into_error(OP))
        }
    }

    /// Takes the rig back from `user`.
    pub async fn release(
        &self,
        user: &str,
        is_async: bool,
        requestor: &Requestor,
    ) -> Result<OpOutcome, OpError> {
        const OP: &str = "release";
        if *requestor != Requestor::Scheduler {
            return Err(OpFault::NotAuthorised.into_error(OP));
        }
        if !self.rig.is_session_active().await {
            return Err(OpFault::NoSession.into_error(OP));
        }
        if self.rig.in_session(user).await != Role::Master {
            return Err(OpFault::NotMaster.into_error(OP));
        }

        if is_async {
            match self.coordinator.submit_release() {
                Ok(()) => Ok(OpOutcome::pending()),
                Err(_) => Err(OpFault::InProgress.into_error(OP)),
            }
        } else if self.rig.revoke().await {
            Ok(OpOutcome::done())
        } else {
            Err(self.action_failure(ActionCategory::Access).await.into_error(OP))
        }
    }

    // --- collaborators ----------------------------------------------------

    /// Adds `user` as a collaborator at the requested tier.
    pub async fn add_slave_user(
        &self,
        user: &str,
        passive: bool,
        requestor: &Requestor,
    ) -> Result<OpOutcome, OpError> {
        const OP: &str = "add slave user";
        if !self.is_scheduler_or_master(requestor).await {
            return Err(OpFault::NotAuthorised.into_error(OP));
        }
        if !self.rig.is_session_active().await {
            return Err(OpFault::NoSession.into_error(OP));
        }
        if self.rig.in_session(user).await == Role::Master {
            return Err(OpFault::AlreadyInSession.into_error(OP));
        }

        if self.rig.add_slave(user, passive).await {
            Ok(OpOutcome::done())
        } else {
            let why = String::from("user may already be a slave user or action failure");
            Err(OpFault::ActionFailure(why).into_error(OP))
        }
    }

    /// Removes collaborator `user`.
    ///
    /// Allowed for the scheduler, the master, and the collaborator
    /// themselves.
    pub async fn remove_slave_user(
        &self,
        user: &str,
        requestor: &Requestor,
    ) -> Result<OpOutcome, OpError> {
        const OP: &str = "remove slave user";
        let self_removal = requestor.user() == Some(user);
        if !self_removal && !self.is_scheduler_or_master(requestor).await {
            return Err(OpFault::NotAuthorised.into_error(OP));
        }
        let role = self.rig.in_session(user).await;
        if role != Role::SlaveActive && role != Role::SlavePassive {
            return Err(OpFault::NotSlave(user.to_string()).into_error(OP));
        }

        if self.rig.revoke_slave(user).await {
            Ok(OpOutcome::done())
        } else {
            Err(self
                .action_failure(ActionCategory::SlaveAccess)
                .await
                .into_error(OP))
        }
    }

    /// Delivers `message` to every session user.
    pub async fn notify_users(
        &self,
        message: &str,
        requestor: &Requestor,
    ) -> Result<OpOutcome, OpError> {
        const OP: &str = "notify";
        let authorised = match requestor {
            Requestor::Scheduler => true,
            Requestor::User(name) => self.rig.in_session(name).await != Role::NotIn,
        };
        if !authorised {
            return Err(OpFault::NotAuthorised.into_error(OP));
        }
        if !self.rig.is_session_active().await {
            return Err(OpFault::NoSession.into_error(OP));
        }

        if self.rig.notify(message).await {
            Ok(OpOutcome::done())
        } else {
            Err(self.action_failure(ActionCategory::Notify).await.into_error(OP))
        }
    }

    // --- batch ------------------------------------------------------------

    /// Starts a batch invocation from `instruction_file`.
    pub async fn perform_batch(
        &self,
        instruction_file: PathBuf,
        requestor: &Requestor,
    ) -> Result<OpOutcome, OpError> {
        const OP: &str = "perform batch";
        if !self.rig.is_session_active().await {
            return Err(OpFault::NoSession.into_error(OP));
        }
        if !self.may_control_batch(requestor).await {
            return Err(OpFault::NotAuthorised.into_error(OP));
        }
        let Some(batch) = &self.batch else {
            return Err(OpFault::NotSupported.into_error(OP));
        };
        if batch.is_batch_running() {
            return Err(OpFault::BatchRunning.into_error(OP));
        }

        let user = match requestor.user() {
            Some(name) => name.to_string(),
            // The scheduler acts on behalf of the session master.
            None => self
                .rig
                .session_users()
                .await
                .into_iter()
                .next()
                .unwrap_or_default(),
        };
        if batch.perform_batch(instruction_file, &user).await {
            Ok(OpOutcome::done())
        } else {
            let why = String::from("batch failed to start");
            Err(OpFault::ActionFailure(why).into_error(OP))
        }
    }

    /// Stops the active batch invocation.
    pub async fn abort_batch(&self, requestor: &Requestor) -> Result<OpOutcome, OpError> {
        const OP: &str = "abort batch";
        let Some(batch) = &self.batch else {
            return Err(OpFault::NotSupported.into_error(OP));
        };
        if !self.may_control_batch(requestor).await {
            return Err(OpFault::NotAuthorised.into_error(OP));
        }

        if batch.abort_batch().await {
            Ok(OpOutcome::done())
        } else {
            let why = String::from("batch failed to abort, perhaps timeout");
            Err(OpFault::ActionFailure(why).into_error(OP))
        }
    }

    /// Batch state snapshot for polling.
    ///
    /// Reports NOT_SUPPORTED both without batch capability and for
    /// unauthorised requestors; callers cannot distinguish the two.
    pub async fn get_batch_status(&self, requestor: &Requestor) -> BatchStatus {
        let authorised = match requestor {
            Requestor::Scheduler => true,
            Requestor::User(name) => self.rig.in_session(name).await != Role::NotIn,
        };
        let batch = match (&self.batch, authorised) {
            (Some(batch), true) => batch,
            _ => {
                let mut results = BatchResults::clear();
                results.state = BatchState::NotSupported;
                return BatchStatus {
                    state: BatchState::NotSupported,
                    progress: 0,
                    results,
                };
            }
        };
        BatchStatus {
            state: batch.batch_state(),
            progress: batch.batch_progress(),
            results: batch.batch_results(),
        }
    }

    // --- status and maintenance ------------------------------------------

    /// Rig health and session summary.
    pub async fn get_status(&self) -> StatusReport {
        StatusReport {
            in_maintenance: !self.rig.is_not_in_maintenance().await,
            maintenance_reason: self.rig.maintenance_reason().await,
            monitor_good: self.rig.is_monitor_status_good().await,
            monitor_reason: self.rig.monitor_reason().await,
            session_active: self.rig.is_session_active().await,
            session_users: self.rig.session_users().await,
        }
    }

    /// Puts the rig into or takes it out of maintenance.
    pub async fn set_maintenance(
        &self,
        offline: bool,
        reason: &str,
        run_tests: bool,
        requestor: &Requestor,
    ) -> Result<OpOutcome, OpError> {
        const OP: &str = "set maintenance";
        if *requestor != Requestor::Scheduler {
            return Err(OpFault::NotAuthorised.into_error(OP));
        }
        // The controller reports success unconditionally.
        self.rig.set_maintenance(offline, reason, run_tests).await;
        Ok(OpOutcome::done())
    }

    /// Re-paces the exerciser tests.
    pub async fn set_test_interval(
        &self,
        minutes: u32,
        requestor: &Requestor,
    ) -> Result<OpOutcome, OpError> {
        const OP: &str = "set test interval";
        if *requestor != Requestor::Scheduler {
            return Err(OpFault::NotAuthorised.into_error(OP));
        }
        self.rig.set_test_interval(minutes).await;
        Ok(OpOutcome::done())
    }

    /// Looks up a deployment attribute.
    pub fn attribute(&self, key: &str) -> Result<String, OpError> {
        self.rig
            .attribute(key)
            .map(str::to_string)
            .ok_or_else(|| OpFault::AttributeNotFound(key.to_string()).into_error("get attribute"))
    }

    // --- internals --------------------------------------------------------

    async fn is_scheduler_or_master(&self, requestor: &Requestor) -> bool {
        match requestor {
            Requestor::Scheduler => true,
            Requestor::User(name) => self.rig.in_session(name).await == Role::Master,
        }
    }

    async fn may_control_batch(&self, requestor: &Requestor) -> bool {
        match requestor {
            Requestor::Scheduler => true,
            Requestor::User(name) => self.rig.has_permission(name, Role::SlaveActive).await,
        }
    }

    async fn action_failure(&self, category: ActionCategory) -> OpFault {
        let why = self
            .rig
            .action_failure_reason(category)
            .await
            .unwrap_or_else(|| String::from("Action failure"));
        OpFault::ActionFailure(why)
    }
}
