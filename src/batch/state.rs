//! Batch lifecycle states and the results snapshot.

use std::path::PathBuf;

/// Where a batch invocation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// No invocation has run since the last clear.
    Clear,
    /// An invocation is in setup or running.
    InProgress,
    /// The last invocation ran to completion.
    Complete,
    /// The last invocation failed to start or crashed.
    Failed,
    /// The last invocation was terminated on request.
    Aborted,
    /// The rig has no batch capability.
    NotSupported,
}

impl BatchState {
    pub fn as_label(&self) -> &'static str {
        match self {
            BatchState::Clear => "clear",
            BatchState::InProgress => "in-progress",
            BatchState::Complete => "complete",
            BatchState::Failed => "failed",
            BatchState::Aborted => "aborted",
            BatchState::NotSupported => "not-supported",
        }
    }
}

/// Snapshot of a finished or running invocation.
#[derive(Debug, Clone)]
pub struct BatchResults {
    pub state: BatchState,
    /// Instruction file the invocation was started with.
    pub instruction_file: Option<PathBuf>,
    /// Files the job left in its working directory.
    pub result_files: Vec<PathBuf>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl BatchResults {
    /// The empty snapshot reported before any invocation.
    pub fn clear() -> Self {
        Self {
            state: BatchState::Clear,
            instruction_file: None,
            result_files: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
        }
    }
}
