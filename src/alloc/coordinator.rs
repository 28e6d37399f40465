//! # Asynchronous allocation coordinator.
//!
//! Allocation and release can take seconds on real hardware, so the
//! scheduling server may ask for them asynchronously: the request is
//! admitted or refused immediately, runs on a single background worker, and
//! the outcome travels back through the [`SchedulingCallback`] port.
//!
//! ```text
//!   submit_allocate / submit_release
//!            |  try_send (bounded, capacity 2)
//!            v
//!       [ job queue ] --> worker --> Rig assign/revoke --> callback
//! ```
//!
//! ## Rules
//!
//! - One worker; jobs run to completion and are never interrupted.
//! - Allocation never queues: it is admitted only when the coordinator is
//!   fully idle.
//! - Release may queue at most one deep behind an executing allocation, and
//!   never behind an executing release.
//! - A failed allocation callback (transport fault, or the server refusing
//!   the outcome) rolls the grant back by revoking the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::actions::ActionCategory;
use crate::alloc::callback::{CallbackFault, CallbackRequest, SchedulingCallback};
use crate::rig::Rig;

/// Error code reported in callbacks when a rig action fails.
const ACTION_FAILURE_CODE: u16 = 16;

const QUEUE_CAPACITY: usize = 2;

/// A queued unit of work.
#[derive(Debug)]
enum Job {
    Allocate { user: String },
    Release,
}

/// Which kind of job the worker is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Allocate,
    Release,
}

/// Why a submission was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// A conflicting job is already executing or queued.
    #[error("a conflicting job is already executing or queued")]
    Busy,
    /// The job queue is full.
    #[error("job queue is full")]
    QueueFull,
    /// The worker is no longer accepting jobs.
    #[error("coordinator is closed")]
    Closed,
}

// current-job encoding for the AtomicU8
const CURRENT_NONE: u8 = 0;
const CURRENT_ALLOCATE: u8 = 1;
const CURRENT_RELEASE: u8 = 2;

/// Admission control plus the single background worker.
///
/// Construct once, spawn [`Coordinator::run`] under a cancellation token,
/// then submit jobs from anywhere.
pub struct Coordinator {
    rig: Arc<Rig>,
    callback: Arc<dyn SchedulingCallback>,
    tx: mpsc::Sender<Job>,
    /// Taken exactly once by `run`.
    rx: Mutex<Option<mpsc::Receiver<Job>>>,
    /// Jobs accepted but not yet picked up by the worker.
    queued: AtomicUsize,
    current: AtomicU8,
}

impl Coordinator {
    pub fn new(rig: Arc<Rig>, callback: Arc<dyn SchedulingCallback>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        Arc::new(Self {
            rig,
            callback,
            tx,
            rx: Mutex::new(Some(rx)),
            queued: AtomicUsize::new(0),
            current: AtomicU8::new(CURRENT_NONE),
        })
    }

    /// Admits an asynchronous allocation for `user`.
    ///
    /// Refused unless the coordinator is completely idle.
    pub fn submit_allocate(&self, user: &str) -> Result<(), SubmitError> {
        if self.is_executing() || self.queued.load(Ordering::SeqCst) > 0 {
            return Err(SubmitError::Busy);
        }
        self.admit(Job::Allocate {
            user: user.to_string(),
        })
    }

    /// Admits an asynchronous release.
    ///
    /// May queue one deep behind an executing allocation; refused while a
    /// release is executing or the queue is full.
    pub fn submit_release(&self) -> Result<(), SubmitError> {
        if self.current_job() == Some(JobKind::Release) {
            return Err(SubmitError::Busy);
        }
        if self.queued.load(Ordering::SeqCst) >= QUEUE_CAPACITY {
            return Err(SubmitError::QueueFull);
        }
        self.admit(Job::Release)
    }

    fn admit(&self, job: Job) -> Result<(), SubmitError> {
        // Count before sending so the worker's decrement cannot underflow.
        self.queued.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                Err(SubmitError::Closed)
            }
        }
    }

    /// The job the worker is executing right now, if any.
    pub fn current_job(&self) -> Option<JobKind> {
        match self.current.load(Ordering::SeqCst) {
            CURRENT_ALLOCATE => Some(JobKind::Allocate),
            CURRENT_RELEASE => Some(JobKind::Release),
            _ => None,
        }
    }

    pub fn is_executing(&self) -> bool {
        self.current.load(Ordering::SeqCst) != CURRENT_NONE
    }

    /// Runs the worker loop until `token` is cancelled.
    ///
    /// Jobs already executing finish; queued jobs admitted before the
    /// cancellation are abandoned. Calling `run` twice is a no-op.
    pub async fn run(&self, token: CancellationToken) {
        let Some(mut rx) = self.rx.lock().await.take() else {
            tracing::warn!("coordinator worker already started");
            return;
        };
        tracing::debug!("coordinator worker started");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!("coordinator worker stopped");
                    return;
                }
                job = rx.recv() => {
                    let Some(job) = job else { return };
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    match job {
                        Job::Allocate { user } => {
                            self.current.store(CURRENT_ALLOCATE, Ordering::SeqCst);
                            self.run_allocate(&user).await;
                        }
                        Job::Release => {
                            self.current.store(CURRENT_RELEASE, Ordering::SeqCst);
                            self.run_release().await;
                        }
                    }
                    self.current.store(CURRENT_NONE, Ordering::SeqCst);
                }
            }
        }
    }

    async fn run_allocate(&self, user: &str) {
        let assigned = self.rig.assign(user).await;
        let request = self.outcome_request(assigned).await;

        let rolled_back = match self.callback.allocate_callback(request).await {
            Ok(response) if response.successful => false,
            Ok(response) => {
                tracing::warn!(
                    user,
                    reason = response.error_reason.as_deref().unwrap_or("unspecified"),
                    "scheduling server refused allocation outcome"
                );
                assigned
            }
            Err(CallbackFault::Transport(reason)) => {
                tracing::error!(user, %reason, "allocation callback failed");
                assigned
            }
        };

        // The server never learned about the grant, so take it back.
        if rolled_back {
            self.rig.revoke().await;
            tracing::warn!(user, "allocation rolled back");
        }
    }

    async fn run_release(&self) {
        let revoked = self.rig.revoke().await;
        let request = self.outcome_request(revoked).await;
        match self.callback.release_callback(request).await {
            Ok(response) if response.successful => {}
            Ok(response) => {
                tracing::warn!(
                    reason = response.error_reason.as_deref().unwrap_or("unspecified"),
                    "scheduling server refused release outcome"
                );
            }
            Err(CallbackFault::Transport(reason)) => {
                tracing::error!(%reason, "release callback failed");
            }
        }
    }

    async fn outcome_request(&self, success: bool) -> CallbackRequest {
        let error = if success {
            None
        } else {
            let reason = self
                .rig
                .action_failure_reason(ActionCategory::Access)
                .await
                .unwrap_or_else(|| String::from("Action failure"));
            Some((ACTION_FAILURE_CODE, reason))
        };
        CallbackRequest {
            rig: self.rig.name().to_string(),
            success,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::actions::{AccessAction, Action};
    use crate::alloc::callback::CallbackResponse;
    use crate::config::RigConfig;

    struct MockAccess {
        ok: bool,
    }

    impl Action for MockAccess {
        fn action_type(&self) -> &str {
            "mock-access"
        }

        fn failure_reason(&self) -> Option<String> {
            (!self.ok).then(|| String::from("hardware refused"))
        }
    }

    #[async_trait]
    impl AccessAction for MockAccess {
        async fn assign(&self, _user: &str) -> bool {
            self.ok
        }

        async fn revoke(&self, _user: &str) -> bool {
            true
        }
    }

    /// Callback double: records requests, optionally parks the worker until
    /// released, and answers with a configurable verdict.
    struct MockCallback {
        requests: std::sync::Mutex<Vec<CallbackRequest>>,
        accept: AtomicBool,
        transport_fault: AtomicBool,
        hold: AtomicBool,
        release: Notify,
        delivered: AtomicU32,
    }

    impl MockCallback {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                requests: std::sync::Mutex::new(Vec::new()),
                accept: AtomicBool::new(true),
                transport_fault: AtomicBool::new(false),
                hold: AtomicBool::new(false),
                release: Notify::new(),
                delivered: AtomicU32::new(0),
            })
        }

        async fn answer(
            &self,
            request: CallbackRequest,
        ) -> Result<CallbackResponse, CallbackFault> {
            self.requests.lock().unwrap().push(request);
            if self.hold.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.transport_fault.load(Ordering::SeqCst) {
                return Err(CallbackFault::Transport(String::from("server unreachable")));
            }
            Ok(CallbackResponse {
                successful: self.accept.load(Ordering::SeqCst),
                error_reason: None,
            })
        }
    }

    #[async_trait]
    impl SchedulingCallback for MockCallback {
        async fn allocate_callback(
            &self,
            request: CallbackRequest,
        ) -> Result<CallbackResponse, CallbackFault> {
            self.answer(request).await
        }

        async fn release_callback(
            &self,
            request: CallbackRequest,
        ) -> Result<CallbackResponse, CallbackFault> {
            self.answer(request).await
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn rig_with_access(ok: bool) -> Arc<Rig> {
        let rig = Rig::new(RigConfig::default());
        rig.register_access(Arc::new(MockAccess { ok })).await;
        rig
    }

    fn start(coord: &Arc<Coordinator>) -> CancellationToken {
        let token = CancellationToken::new();
        let worker = coord.clone();
        let child = token.clone();
        tokio::spawn(async move { worker.run(child).await });
        token
    }

    #[tokio::test]
    async fn allocate_grants_and_reports() {
        let rig = rig_with_access(true).await;
        let callback = MockCallback::new();
        let coord = Coordinator::new(rig.clone(), callback.clone());
        let token = start(&coord);

        coord.submit_allocate("alice").unwrap();
        wait_for(|| callback.delivered.load(Ordering::SeqCst) == 1).await;

        assert!(rig.is_session_active().await);
        let requests = callback.requests.lock().unwrap();
        assert!(requests[0].success);
        assert!(requests[0].error.is_none());
        drop(requests);

        wait_for(|| !coord.is_executing()).await;
        token.cancel();
    }

    #[tokio::test]
    async fn failed_allocate_reports_action_failure_code() {
        let rig = rig_with_access(false).await;
        let callback = MockCallback::new();
        let coord = Coordinator::new(rig.clone(), callback.clone());
        let token = start(&coord);

        coord.submit_allocate("alice").unwrap();
        wait_for(|| callback.delivered.load(Ordering::SeqCst) == 1).await;

        let requests = callback.requests.lock().unwrap();
        assert!(!requests[0].success);
        assert_eq!(
            requests[0].error,
            Some((16, String::from("hardware refused")))
        );
        drop(requests);
        assert!(!rig.is_session_active().await);
        token.cancel();
    }

    #[tokio::test]
    async fn refused_outcome_rolls_the_grant_back() {
        let rig = rig_with_access(true).await;
        let callback = MockCallback::new();
        callback.accept.store(false, Ordering::SeqCst);
        let coord = Coordinator::new(rig.clone(), callback.clone());
        let token = start(&coord);

        coord.submit_allocate("alice").unwrap();
        wait_for(|| callback.delivered.load(Ordering::SeqCst) == 1).await;
        wait_for(|| !coord.is_executing()).await;

        assert!(!rig.is_session_active().await, "grant must be rolled back");
        token.cancel();
    }

    #[tokio::test]
    async fn transport_fault_rolls_the_grant_back() {
        let rig = rig_with_access(true).await;
        let callback = MockCallback::new();
        callback.transport_fault.store(true, Ordering::SeqCst);
        let coord = Coordinator::new(rig.clone(), callback.clone());
        let token = start(&coord);

        coord.submit_allocate("alice").unwrap();
        wait_for(|| callback.delivered.load(Ordering::SeqCst) == 1).await;
        wait_for(|| !coord.is_executing()).await;

        assert!(!rig.is_session_active().await);
        token.cancel();
    }

    #[tokio::test]
    async fn release_failure_never_rolls_back() {
        let rig = rig_with_access(true).await;
        let callback = MockCallback::new();
        callback.accept.store(false, Ordering::SeqCst);
        let coord = Coordinator::new(rig.clone(), callback.clone());
        let token = start(&coord);

        assert!(rig.assign("alice").await);
        coord.submit_release().unwrap();
        wait_for(|| callback.delivered.load(Ordering::SeqCst) == 1).await;
        wait_for(|| !coord.is_executing()).await;

        assert!(!rig.is_session_active().await, "revocation stands");
        token.cancel();
    }

    #[tokio::test]
    async fn admission_rules_while_a_job_executes() {
        let rig = rig_with_access(true).await;
        let callback = MockCallback::new();
        callback.hold.store(true, Ordering::SeqCst);
        let coord = Coordinator::new(rig.clone(), callback.clone());
        let token = start(&coord);

        coord.submit_allocate("alice").unwrap();
        wait_for(|| coord.current_job() == Some(JobKind::Allocate)).await;

        // Allocation never queues.
        assert_eq!(coord.submit_allocate("bob"), Err(SubmitError::Busy));

        // Release queues one deep behind the executing allocation.
        assert_eq!(coord.submit_release(), Ok(()));
        assert_eq!(coord.submit_release(), Ok(()));
        assert_eq!(coord.submit_release(), Err(SubmitError::QueueFull));

        // With anything queued, allocation stays refused.
        assert_eq!(coord.submit_allocate("bob"), Err(SubmitError::Busy));

        callback.hold.store(false, Ordering::SeqCst);
        callback.release.notify_waiters();
        // Parked releases wake as the worker reaches them.
        callback.release.notify_one();
        callback.release.notify_one();
        wait_for(|| callback.delivered.load(Ordering::SeqCst) == 3).await;
        wait_for(|| !coord.is_executing()).await;

        token.cancel();
    }

    #[tokio::test]
    async fn release_refused_while_a_release_executes() {
        let rig = rig_with_access(true).await;
        let callback = MockCallback::new();
        callback.hold.store(true, Ordering::SeqCst);
        let coord = Coordinator::new(rig.clone(), callback.clone());
        let token = start(&coord);

        assert!(rig.assign("alice").await);
        coord.submit_release().unwrap();
        wait_for(|| coord.current_job() == Some(JobKind::Release)).await;

        assert_eq!(coord.submit_release(), Err(SubmitError::Busy));

        callback.hold.store(false, Ordering::SeqCst);
        callback.release.notify_waiters();
        wait_for(|| !coord.is_executing()).await;
        token.cancel();
    }
}
