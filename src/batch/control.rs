//! # Batch job controller.
//!
//! [`BatchControl`] owns at most one batch invocation at a time: it admits
//! a request, creates a fresh runner through the factory, supervises its
//! startup against a deadline, and answers state, progress, and results
//! queries while the job runs.
//!
//! ## Rules
//!
//! - One invocation at a time; a second request while one is active fails.
//! - A job that has not left setup within `start_timeout` is terminated and
//!   the invocation fails.
//! - Aborting waits up to `abort_timeout` for the process to die and
//!   reports whether it did.
//! - Timeouts are checked against monotonic deadlines, never wall-clock
//!   arithmetic.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::batch::progress::{ProgressParser, StdoutTokenProgress};
use crate::batch::runner::{BatchRunner, BatchRunnerFactory};
use crate::batch::state::{BatchResults, BatchState};
use crate::config::BatchConfig;

/// Supervisor for one-at-a-time batch invocations.
pub struct BatchControl {
    cfg: BatchConfig,
    factory: Arc<dyn BatchRunnerFactory>,
    parser: Box<dyn ProgressParser>,
    runner: Mutex<Option<Arc<dyn BatchRunner>>>,
}

impl BatchControl {
    pub fn new(cfg: BatchConfig, factory: Arc<dyn BatchRunnerFactory>) -> Self {
        Self {
            cfg,
            factory,
            parser: Box::new(StdoutTokenProgress),
            runner: Mutex::new(None),
        }
    }

    /// Replaces the stdout progress convention.
    pub fn with_parser(mut self, parser: impl ProgressParser) -> Self {
        self.parser = Box::new(parser);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn BatchRunner>>> {
        self.runner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<dyn BatchRunner>> {
        self.lock().clone()
    }

    /// Starts a batch invocation for `user` with `instruction_file`.
    ///
    /// Returns once the job has demonstrably started (`true`) or failed to
    /// do so within `start_timeout` (`false`).
    pub async fn perform_batch(&self, instruction_file: PathBuf, user: &str) -> bool {
        let runner = {
            let mut slot = self.lock();
            if slot
                .as_ref()
                .map(|r| r.is_in_setup() || r.is_running())
                .unwrap_or(false)
            {
                tracing::warn!(user, "batch refused, an invocation is active");
                return false;
            }
            let runner = self.factory.create(instruction_file, user);
            *slot = Some(runner.clone());
            runner
        };

        if !runner.spawn().await {
            tracing::warn!(user, "batch launch failed");
            return false;
        }

        let deadline = Instant::now() + self.cfg.start_timeout;
        loop {
            if runner.is_failed() {
                tracing::warn!(user, "batch failed during startup");
                return false;
            }
            if runner.is_started() {
                tracing::info!(user, "batch started");
                return true;
            }
            if Instant::now() >= deadline {
                tracing::error!(user, "batch startup deadline passed, terminating");
                runner.terminate().await;
                return false;
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
    }

    /// `true` while an invocation is in setup or running.
    pub fn is_batch_running(&self) -> bool {
        self.current()
            .map(|r| r.is_in_setup() || r.is_running())
            .unwrap_or(false)
    }

    /// Where the current or most recent invocation stands.
    pub fn batch_state(&self) -> BatchState {
        let Some(runner) = self.current() else {
            return BatchState::Clear;
        };
        if runner.is_failed() {
            BatchState::Failed
        } else if runner.is_killed() {
            BatchState::Aborted
        } else if runner.is_in_setup() || runner.is_running() {
            BatchState::InProgress
        } else {
            BatchState::Complete
        }
    }

    /// Progress percentage: 0 before start, 100 once terminal, otherwise
    /// whatever the parser reads from stdout (-1 when unreadable).
    pub fn batch_progress(&self) -> i32 {
        let Some(runner) = self.current() else {
            return 0;
        };
        match self.batch_state() {
            BatchState::Clear => 0,
            BatchState::Complete | BatchState::Failed | BatchState::Aborted => 100,
            _ if !runner.is_started() => 0,
            _ => self.parser.parse(&runner.stdout()),
        }
    }

    /// Stops the active invocation.
    ///
    /// Returns `true` once nothing is running, waiting up to
    /// `abort_timeout` for the process to die.
    pub async fn abort_batch(&self) -> bool {
        let Some(runner) = self.current() else {
            return true;
        };
        if !runner.is_in_setup() && !runner.is_running() {
            return true;
        }

        runner.terminate().await;
        let deadline = Instant::now() + self.cfg.abort_timeout;
        loop {
            if !runner.is_in_setup() && !runner.is_running() {
                tracing::info!("batch aborted");
                return true;
            }
            if Instant::now() >= deadline {
                tracing::error!("batch did not stop within the abort deadline");
                return false;
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
    }

    /// Forgets the last invocation, aborting it first if still active.
    pub async fn clear_batch_state(&self) {
        if self.is_batch_running() && !self.abort_batch().await {
            tracing::warn!("clearing batch state while the job is still alive");
        }
        *self.lock() = None;
    }

    /// Snapshot of the current or most recent invocation.
    pub fn batch_results(&self) -> BatchResults {
        let Some(runner) = self.current() else {
            return BatchResults::clear();
        };
        BatchResults {
            state: self.batch_state(),
            instruction_file: runner.instruction_file(),
            result_files: runner.result_files(),
            stdout: runner.stdout(),
            stderr: runner.stderr(),
            exit_code: runner.exit_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    /// Runner double driven by test-set flags.
    struct MockRunner {
        start_on_spawn: bool,
        die_on_terminate: bool,
        in_setup: AtomicBool,
        started: AtomicBool,
        running: AtomicBool,
        failed: AtomicBool,
        killed: AtomicBool,
        terminates: AtomicU32,
        stdout: std::sync::Mutex<String>,
    }

    impl MockRunner {
        fn new(start_on_spawn: bool, die_on_terminate: bool) -> Arc<Self> {
            Arc::new(Self {
                start_on_spawn,
                die_on_terminate,
                in_setup: AtomicBool::new(true),
                started: AtomicBool::new(false),
                running: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                killed: AtomicBool::new(false),
                terminates: AtomicU32::new(0),
                stdout: std::sync::Mutex::new(String::new()),
            })
        }

        fn finish(&self) {
            self.running.store(false, Ordering::SeqCst);
            self.in_setup.store(false, Ordering::SeqCst);
        }

        fn set_stdout(&self, text: &str) {
            *self.stdout.lock().unwrap() = text.to_string();
        }
    }

    #[async_trait]
    impl BatchRunner for MockRunner {
        async fn spawn(&self) -> bool {
            if self.start_on_spawn {
                self.in_setup.store(false, Ordering::SeqCst);
                self.started.store(true, Ordering::SeqCst);
                self.running.store(true, Ordering::SeqCst);
            }
            true
        }

        fn is_in_setup(&self) -> bool {
            self.in_setup.load(Ordering::SeqCst)
        }

        fn is_started(&self) -> bool {
            self.started.load(Ordering::SeqCst)
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn is_failed(&self) -> bool {
            self.failed.load(Ordering::SeqCst)
        }

        fn is_killed(&self) -> bool {
            self.killed.load(Ordering::SeqCst)
        }

        fn stdout(&self) -> String {
            self.stdout.lock().unwrap().clone()
        }

        fn stderr(&self) -> String {
            String::new()
        }

        fn exit_code(&self) -> Option<i32> {
            None
        }

        fn result_files(&self) -> Vec<PathBuf> {
            Vec::new()
        }

        fn instruction_file(&self) -> Option<PathBuf> {
            Some(PathBuf::from("instructions.txt"))
        }

        async fn terminate(&self) {
            self.terminates.fetch_add(1, Ordering::SeqCst);
            if self.die_on_terminate {
                self.in_setup.store(false, Ordering::SeqCst);
                self.running.store(false, Ordering::SeqCst);
                self.killed.store(true, Ordering::SeqCst);
            }
        }
    }

    struct MockFactory {
        runner: Arc<MockRunner>,
    }

    impl BatchRunnerFactory for MockFactory {
        fn create(&self, _instruction_file: PathBuf, _user: &str) -> Arc<dyn BatchRunner> {
            self.runner.clone()
        }
    }

    fn fast_cfg() -> BatchConfig {
        BatchConfig {
            start_timeout: Duration::from_millis(100),
            abort_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            ..BatchConfig::default()
        }
    }

    fn control(runner: Arc<MockRunner>) -> BatchControl {
        BatchControl::new(fast_cfg(), Arc::new(MockFactory { runner }))
    }

    #[tokio::test]
    async fn lifecycle_clear_to_complete() {
        let runner = MockRunner::new(true, true);
        let control = control(runner.clone());
        assert_eq!(control.batch_state(), BatchState::Clear);
        assert_eq!(control.batch_progress(), 0);

        assert!(control.perform_batch(PathBuf::from("job.txt"), "alice").await);
        assert!(control.is_batch_running());
        assert_eq!(control.batch_state(), BatchState::InProgress);

        runner.finish();
        assert_eq!(control.batch_state(), BatchState::Complete);
        assert_eq!(control.batch_progress(), 100);
        assert!(!control.is_batch_running());
    }

    #[tokio::test]
    async fn second_invocation_refused_while_running() {
        let runner = MockRunner::new(true, true);
        let control = control(runner.clone());
        assert!(control.perform_batch(PathBuf::from("a.txt"), "alice").await);
        assert!(!control.perform_batch(PathBuf::from("b.txt"), "alice").await);
    }

    #[tokio::test]
    async fn startup_deadline_terminates_the_runner() {
        // Never leaves setup.
        let runner = MockRunner::new(false, true);
        let control = control(runner.clone());

        assert!(!control.perform_batch(PathBuf::from("job.txt"), "alice").await);
        assert_eq!(runner.terminates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn progress_follows_stdout_while_running() {
        let runner = MockRunner::new(true, true);
        let control = control(runner.clone());
        assert!(control.perform_batch(PathBuf::from("job.txt"), "alice").await);

        assert_eq!(control.batch_progress(), -1, "no stdout yet");
        runner.set_stdout("10 frames\n55 frames\n");
        assert_eq!(control.batch_progress(), 55);
    }

    #[tokio::test]
    async fn abort_reports_whether_the_job_died() {
        let runner = MockRunner::new(true, true);
        let control = control(runner.clone());
        assert!(control.perform_batch(PathBuf::from("job.txt"), "alice").await);

        assert!(control.abort_batch().await);
        assert_eq!(control.batch_state(), BatchState::Aborted);
        assert_eq!(control.batch_progress(), 100);

        // Nothing running: abort is trivially successful.
        assert!(control.abort_batch().await);
    }

    #[tokio::test]
    async fn abort_times_out_on_a_stuck_job() {
        let runner = MockRunner::new(true, false);
        let control = control(runner.clone());
        assert!(control.perform_batch(PathBuf::from("job.txt"), "alice").await);

        assert!(!control.abort_batch().await);
        assert!(control.is_batch_running());
    }

    #[tokio::test]
    async fn clear_forgets_the_invocation() {
        let runner = MockRunner::new(true, true);
        let control = control(runner.clone());
        assert!(control.perform_batch(PathBuf::from("job.txt"), "alice").await);
        runner.finish();

        let results = control.batch_results();
        assert_eq!(results.state, BatchState::Complete);
        assert_eq!(
            results.instruction_file,
            Some(PathBuf::from("instructions.txt"))
        );

        control.clear_batch_state().await;
        assert_eq!(control.batch_state(), BatchState::Clear);
        assert!(control.batch_results().instruction_file.is_none());
    }
}
