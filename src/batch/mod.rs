//! Batch execution: the runner seam, the stock out-of-process runner, the
//! stdout progress convention, and the one-at-a-time controller.

mod control;
mod process;
mod progress;
mod runner;
mod state;

pub use control::BatchControl;
pub use process::{ProcessBatchRunner, ProcessRunnerFactory};
pub use progress::{ProgressParser, StdoutTokenProgress};
pub use runner::{BatchRunner, BatchRunnerFactory};
pub use state::{BatchResults, BatchState};
