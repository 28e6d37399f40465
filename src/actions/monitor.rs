//! # Supervised monitor loop for exerciser tests.
//!
//! Registering a [`TestAction`](crate::actions::TestAction) spawns one
//! [`TestMonitor`] task that drives the test for the rig's whole lifetime:
//!
//! ```text
//! loop:
//!   wait until tests are enabled        (session ended -> paused)
//!   action.run_test().await             (one pass, updates verdict)
//!   sleep(action.interval())            (cancellable)
//! ```
//!
//! ## Rules
//!
//! - The gate is a watch channel: flipping it while the monitor sleeps takes
//!   effect at the next loop iteration, not mid-pass.
//! - Cancelling the rig's root token stops the loop permanently; a stopped
//!   monitor is never restarted and further gate flips are ignored.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::action::TestRef;

/// Handle to a spawned monitor loop.
///
/// Dropping the handle does not stop the loop; only the cancellation token
/// passed at spawn does.
pub struct TestMonitor {
    enabled: watch::Sender<bool>,
}

impl TestMonitor {
    /// Spawns the monitor loop for `action` under `token`.
    ///
    /// The loop starts enabled: standalone rigs exercise their hardware
    /// until a session begins.
    pub fn spawn(action: TestRef, token: CancellationToken) -> Self {
        let (tx, rx) = watch::channel(true);
        tokio::spawn(run_monitor(action, rx, token));
        Self { enabled: tx }
    }

    /// Pauses or resumes the test loop.
    pub fn set_enabled(&self, enabled: bool) {
        // send fails only after the loop has exited; the gate is then moot.
        let _ = self.enabled.send(enabled);
    }
}

async fn run_monitor(action: TestRef, mut enabled: watch::Receiver<bool>, token: CancellationToken) {
    let name = action.action_type().to_string();
    tracing::debug!(test = %name, "monitor started");
    loop {
        // Park until the gate opens or the rig shuts down.
        while !*enabled.borrow() {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(test = %name, "monitor stopped");
                    return;
                }
                res = enabled.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }

        action.run_test().await;
        if !action.status() {
            tracing::warn!(
                test = %name,
                reason = action.reason().as_deref().unwrap_or("unknown"),
                "exerciser test failing"
            );
        }

        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(test = %name, "monitor stopped");
                return;
            }
            _ = tokio::time::sleep(action.interval()) => {}
        }
    }
}

/// Snapshot of monitors paired with their actions, used by the rig to flip
/// gates and to aggregate test verdicts.
pub(crate) struct MonitoredTest {
    pub action: TestRef,
    pub monitor: Arc<TestMonitor>,
}
