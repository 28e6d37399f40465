//! # Capability traits for device-specific actions.
//!
//! A rig type customizes its behavior by registering **actions** — small
//! pluggable units of device-specific work, grouped into categories. Each
//! category has its own trait so that a mismatched registration is a compile
//! error rather than a runtime check:
//!
//! - [`AccessAction`] — master access grant/revocation
//! - [`SlaveAccessAction`] — collaborator access grant/revocation
//! - [`NotifyAction`] — user notification
//! - [`ResetAction`] — device reset between sessions
//! - [`TestAction`] — periodic exerciser test driven by a monitor loop
//!
//! All capability traits extend [`Action`], which provides the action's type
//! label and its most recent failure reason. Actions report outcomes as
//! `bool`; a `false` return is recorded by the failure tracker and counts
//! toward the maintenance threshold.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Categories an action may be registered under.
///
/// Each category owns an ordered action list in the registry; actions run
/// in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionCategory {
    /// Master access and revocation.
    Access,
    /// Slave access and revocation.
    SlaveAccess,
    /// User notification.
    Notify,
    /// Rig reset.
    Reset,
    /// Monitor test.
    Test,
}

impl ActionCategory {
    /// Human-readable label used in maintenance reasons and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            ActionCategory::Access => "Session access",
            ActionCategory::SlaveAccess => "Slave access",
            ActionCategory::Notify => "Notification",
            ActionCategory::Reset => "Device reset",
            ActionCategory::Test => "Exerciser test",
        }
    }
}

/// Base contract every capability shares.
pub trait Action: Send + Sync + 'static {
    /// Returns a stable, human-readable action type (e.g. "remote-desktop").
    fn action_type(&self) -> &str;

    /// Returns the reason for the most recent failure, if any.
    fn failure_reason(&self) -> Option<String>;
}

/// Master access grant and revocation.
#[async_trait]
pub trait AccessAction: Action {
    /// Grants master access to `user`. Returns `false` on failure.
    async fn assign(&self, user: &str) -> bool;

    /// Revokes master access from `user`. Returns `false` on failure.
    async fn revoke(&self, user: &str) -> bool;
}

/// Collaborator (slave) access grant and revocation.
#[async_trait]
pub trait SlaveAccessAction: Action {
    /// Grants slave access to `user`; `passive` selects view-only access.
    async fn assign(&self, user: &str, passive: bool) -> bool;

    /// Revokes slave access from `user`; `passive` reports the access level
    /// the user held.
    async fn revoke(&self, user: &str, passive: bool) -> bool;
}

/// Notification delivery to session users.
#[async_trait]
pub trait NotifyAction: Action {
    /// Delivers `message` to all of `users`. Returns `false` on failure.
    async fn notify(&self, message: &str, users: &[String]) -> bool;
}

/// Device reset run after session termination.
#[async_trait]
pub trait ResetAction: Action {
    /// Resets the device to a known state. Returns `false` on failure.
    async fn reset(&self) -> bool;
}

/// Periodic exerciser test.
///
/// A test does not own its own loop: registering it spawns a supervised
/// [`TestMonitor`](crate::actions::TestMonitor) that calls [`TestAction::run_test`]
/// every [`TestAction::interval`] while tests are enabled. The action keeps
/// its own pass/fail verdict, queried through [`TestAction::status`] and
/// [`TestAction::reason`].
#[async_trait]
pub trait TestAction: Action {
    /// Runs one test pass, updating the internal verdict.
    async fn run_test(&self);

    /// Returns `true` while the tested rig aspect is integral.
    fn status(&self) -> bool;

    /// Returns why the test is failing, or `None` while it passes.
    fn reason(&self) -> Option<String>;

    /// Sets how often the test runs, in minutes.
    fn set_interval(&self, minutes: u32);

    /// Current pacing between test passes, used by the monitor loop.
    fn interval(&self) -> Duration;
}

/// Shared handle types used by the registry.
pub type AccessRef = Arc<dyn AccessAction>;
pub type SlaveAccessRef = Arc<dyn SlaveAccessAction>;
pub type NotifyRef = Arc<dyn NotifyAction>;
pub type ResetRef = Arc<dyn ResetAction>;
pub type TestRef = Arc<dyn TestAction>;
