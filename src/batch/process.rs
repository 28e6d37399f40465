//! # Out-of-process batch runner.
//!
//! Runs a batch job as a child process: a fresh timestamped working
//! directory per invocation, piped stdout/stderr drained by reader tasks,
//! and termination through a cancellation token observed next to the child
//! wait.
//!
//! ```text
//!   spawn() -> mkdir workdir -> Command (piped) -> driver task
//!                                                   |- stdout reader
//!                                                   |- stderr reader
//!                                                   `- select! { wait, terminate }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::runner::{BatchRunner, BatchRunnerFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    InSetup,
    Running,
    Complete,
    Failed,
    Killed,
}

struct ProcState {
    phase: Phase,
    started: bool,
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    result_files: Vec<PathBuf>,
}

struct Inner {
    state: Mutex<ProcState>,
    terminate: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ProcState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Batch runner backed by a child process.
///
/// The configured command is invoked with its arguments plus the
/// instruction file path appended last, inside a fresh working directory
/// created under `working_dir_base`. Whatever the job leaves in that
/// directory becomes the result-file set.
pub struct ProcessBatchRunner {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir_base: PathBuf,
    instruction_file: PathBuf,
    user: String,
    inner: Arc<Inner>,
}

impl ProcessBatchRunner {
    pub fn new(
        command: impl Into<String>,
        instruction_file: PathBuf,
        user: impl Into<String>,
        working_dir_base: PathBuf,
    ) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir_base,
            instruction_file,
            user: user.into(),
            inner: Arc::new(Inner {
                state: Mutex::new(ProcState {
                    phase: Phase::InSetup,
                    started: false,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    result_files: Vec::new(),
                }),
                terminate: CancellationToken::new(),
            }),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn fail_setup(&self, why: &str) {
        tracing::error!(command = %self.command, why, "batch setup failed");
        let mut st = self.inner.lock();
        st.phase = Phase::Failed;
        st.stderr.push_str(why);
        st.stderr.push('\n');
    }
}

#[async_trait]
impl BatchRunner for ProcessBatchRunner {
    async fn spawn(&self) -> bool {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let working_dir = self
            .working_dir_base
            .join(format!("batch-{}-{stamp}", self.user));

        if let Err(err) = tokio::fs::create_dir_all(&working_dir).await {
            self.fail_setup(&format!("cannot create working directory: {err}"));
            return false;
        }

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .arg(&self.instruction_file)
            .envs(&self.env)
            .current_dir(&working_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.fail_setup(&format!("cannot spawn {}: {err}", self.command));
                return false;
            }
        };
        tracing::info!(
            command = %self.command,
            dir = %working_dir.display(),
            user = %self.user,
            "batch process spawned"
        );

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        {
            let mut st = self.inner.lock();
            st.phase = Phase::Running;
            st.started = true;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let out_reader = stdout.map(|out| {
                let inner = inner.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(out).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let mut st = inner.lock();
                        st.stdout.push_str(&line);
                        st.stdout.push('\n');
                    }
                })
            });
            let err_reader = stderr.map(|err| {
                let inner = inner.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(err).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let mut st = inner.lock();
                        st.stderr.push_str(&line);
                        st.stderr.push('\n');
                    }
                })
            });

            let mut killed = false;
            let status = tokio::select! {
                status = child.wait() => status,
                _ = inner.terminate.cancelled() => {
                    killed = true;
                    // start_kill only fails when the child is already gone.
                    let _ = child.start_kill();
                    child.wait().await
                }
            };

            // Drain the readers before recording a terminal phase so
            // observers never see a finished job with a half-read buffer.
            if let Some(handle) = out_reader {
                let _ = handle.await;
            }
            if let Some(handle) = err_reader {
                let _ = handle.await;
            }

            let results = collect_result_files(&working_dir);
            let mut st = inner.lock();
            st.result_files = results;
            match status {
                Ok(status) => {
                    st.exit_code = status.code();
                    st.phase = if killed {
                        Phase::Killed
                    } else {
                        Phase::Complete
                    };
                    tracing::info!(code = ?status.code(), killed, "batch process ended");
                }
                Err(err) => {
                    st.phase = Phase::Failed;
                    tracing::error!(%err, "batch process wait failed");
                }
            }
        });

        true
    }

    fn is_in_setup(&self) -> bool {
        self.inner.lock().phase == Phase::InSetup
    }

    fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    fn is_running(&self) -> bool {
        self.inner.lock().phase == Phase::Running
    }

    fn is_failed(&self) -> bool {
        self.inner.lock().phase == Phase::Failed
    }

    fn is_killed(&self) -> bool {
        self.inner.lock().phase == Phase::Killed
    }

    fn stdout(&self) -> String {
        self.inner.lock().stdout.clone()
    }

    fn stderr(&self) -> String {
        self.inner.lock().stderr.clone()
    }

    fn exit_code(&self) -> Option<i32> {
        self.inner.lock().exit_code
    }

    fn result_files(&self) -> Vec<PathBuf> {
        self.inner.lock().result_files.clone()
    }

    fn instruction_file(&self) -> Option<PathBuf> {
        Some(self.instruction_file.clone())
    }

    async fn terminate(&self) {
        self.inner.terminate.cancel();
    }
}

fn collect_result_files(working_dir: &std::path::Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(working_dir) {
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    files
}

/// Factory producing [`ProcessBatchRunner`]s for a fixed command line.
pub struct ProcessRunnerFactory {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir_base: PathBuf,
}

impl ProcessRunnerFactory {
    pub fn new(command: impl Into<String>, working_dir_base: PathBuf) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir_base,
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl BatchRunnerFactory for ProcessRunnerFactory {
    fn create(&self, instruction_file: PathBuf, user: &str) -> Arc<dyn BatchRunner> {
        let mut runner = ProcessBatchRunner::new(
            self.command.clone(),
            instruction_file,
            user,
            self.working_dir_base.clone(),
        )
        .with_args(self.args.iter().cloned());
        for (key, value) in &self.env {
            runner = runner.with_env(key.clone(), value.clone());
        }
        Arc::new(runner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let runner = ProcessBatchRunner::new(
            "sh",
            PathBuf::from("/dev/null"),
            "alice",
            std::env::temp_dir(),
        )
        .with_arg("-c")
        .with_arg("echo 42; exit 3");

        assert!(runner.spawn().await);
        assert!(runner.is_started());
        wait_for(|| !runner.is_running()).await;

        assert!(!runner.is_killed());
        assert_eq!(runner.exit_code(), Some(3));
        assert!(runner.stdout().contains("42"));
    }

    #[tokio::test]
    async fn terminate_kills_the_process() {
        let runner = ProcessBatchRunner::new(
            "sh",
            PathBuf::from("/dev/null"),
            "alice",
            std::env::temp_dir(),
        )
        .with_arg("-c")
        .with_arg("sleep 60");

        assert!(runner.spawn().await);
        wait_for(|| runner.is_running()).await;

        runner.terminate().await;
        wait_for(|| !runner.is_running()).await;
        assert!(runner.is_killed());
    }

    #[tokio::test]
    async fn missing_command_fails_in_setup() {
        let runner = ProcessBatchRunner::new(
            "definitely-not-a-command-rigvisor",
            PathBuf::from("/dev/null"),
            "alice",
            std::env::temp_dir(),
        );
        assert!(!runner.spawn().await);
        assert!(runner.is_failed());
        assert!(!runner.is_started());
    }

    #[tokio::test]
    async fn result_files_are_collected() {
        let runner = ProcessBatchRunner::new(
            "sh",
            PathBuf::from("/dev/null"),
            "alice",
            std::env::temp_dir(),
        )
        .with_arg("-c")
        .with_arg("echo data > out.txt");

        assert!(runner.spawn().await);
        wait_for(|| !runner.is_running()).await;

        let files = runner.result_files();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("out.txt"));
    }
}
