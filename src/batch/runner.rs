//! # Batch runner seam.
//!
//! [`BatchControl`](crate::batch::BatchControl) drives invocations through
//! this trait rather than a process handle directly, so tests and exotic
//! rig types can substitute their own job driver. The stock implementation
//! is [`ProcessBatchRunner`](crate::batch::ProcessBatchRunner).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

/// One batch invocation: spawned once, observed while it runs, terminated
/// on request.
///
/// Observer methods are synchronous snapshots; the job itself runs on a
/// background task owned by the implementation.
#[async_trait]
pub trait BatchRunner: Send + Sync + 'static {
    /// Launches the job driver. Returns `false` when the launch itself
    /// fails; startup progress is then observed through the state methods.
    async fn spawn(&self) -> bool;

    /// Pre-start checks and working-directory setup still in progress.
    fn is_in_setup(&self) -> bool;

    /// The job process came up at least once.
    fn is_started(&self) -> bool;

    /// The job process is alive right now.
    fn is_running(&self) -> bool;

    /// The invocation ended abnormally (setup failure, crash).
    fn is_failed(&self) -> bool;

    /// The invocation was terminated on request.
    fn is_killed(&self) -> bool;

    /// Captured standard output so far.
    fn stdout(&self) -> String;

    /// Captured standard error so far.
    fn stderr(&self) -> String;

    /// Process exit code once the job has ended.
    fn exit_code(&self) -> Option<i32>;

    /// Files the job left in its working directory.
    fn result_files(&self) -> Vec<PathBuf>;

    /// Instruction file the invocation was started with.
    fn instruction_file(&self) -> Option<PathBuf>;

    /// Stops the job. The final verdict is observed through
    /// [`BatchRunner::is_running`] and [`BatchRunner::is_killed`].
    async fn terminate(&self);
}

/// Creates one fresh runner per invocation.
pub trait BatchRunnerFactory: Send + Sync + 'static {
    fn create(&self, instruction_file: PathBuf, user: &str) -> Arc<dyn BatchRunner>;
}
