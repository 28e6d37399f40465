//! # Resource session controller.
//!
//! [`Rig`] is the sequential entry point for everything that touches session
//! state: one `tokio::sync::Mutex` guards the session map, the action
//! registry, and the maintenance flag, and every operation holds it end to
//! end. Capability actions never see shared state; they receive plain
//! arguments and report `bool`.
//!
//! ```text
//!                 +---------------------------+
//!   assign ------>|                           |---> AccessAction xN
//!   revoke ------>|    Rig (state mutex)      |---> SlaveAccessAction xN
//!   add_slave --->|  session / registry /     |---> NotifyAction xN
//!   notify ------>|  maintenance              |---> ResetAction xN
//!                 +---------------------------+
//!                        |  gate (watch)
//!                        v
//!                  TestMonitor loops (one per TestAction)
//! ```
//!
//! ## Rules
//!
//! - One master at a time; `assign` refuses while a session is active or the
//!   rig is in maintenance.
//! - Partially applied access actions are not rolled back on a failed
//!   `assign`; the next `revoke` cleans up.
//! - `revoke` always clears the session, even when revocation actions fail,
//!   then runs reset actions and restarts the exerciser tests.
//! - A capability instance that fails `action_failure_threshold` times puts
//!   the rig into maintenance; the counter is never reset.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::actions::{
    AccessRef, Action, ActionCategory, ActionRegistry, MonitoredTest, NotifyRef, ResetRef,
    SlaveAccessRef, TestMonitor, TestRef,
};
use crate::config::RigConfig;
use crate::rig::Role;

struct Session {
    master: String,
    /// Slave name to tier; only `SlaveActive` / `SlavePassive` appear here.
    slaves: HashMap<String, Role>,
}

struct RigState {
    registry: ActionRegistry,
    tests: Vec<MonitoredTest>,
    session: Option<Session>,
    maintenance: Option<String>,
}

/// Exclusive session controller for one physical rig.
pub struct Rig {
    cfg: RigConfig,
    state: Mutex<RigState>,
    token: CancellationToken,
}

impl Rig {
    pub fn new(cfg: RigConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            state: Mutex::new(RigState {
                registry: ActionRegistry::new(),
                tests: Vec::new(),
                session: None,
                maintenance: None,
            }),
            token: CancellationToken::new(),
        })
    }

    /// Rig name as registered with the scheduling server.
    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Rig type this instance belongs to.
    pub fn rig_type(&self) -> &str {
        &self.cfg.rig_type
    }

    /// Capability tokens advertised for scheduling matches.
    pub fn capabilities(&self) -> &[String] {
        &self.cfg.capabilities
    }

    /// Looks up a deployment attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.cfg.attribute(key)
    }

    /// All deployment attributes.
    pub fn all_attributes(&self) -> &HashMap<String, String> {
        &self.cfg.attributes
    }

    // --- action registration --------------------------------------------

    /// Registers an action; `false` means this instance is already
    /// registered under the category.
    pub async fn register_access(&self, action: AccessRef) -> bool {
        self.state.lock().await.registry.register_access(action)
    }

    pub async fn register_slave_access(&self, action: SlaveAccessRef) -> bool {
        self.state
            .lock()
            .await
            .registry
            .register_slave_access(action)
    }

    pub async fn register_notify(&self, action: NotifyRef) -> bool {
        self.state.lock().await.registry.register_notify(action)
    }

    pub async fn register_reset(&self, action: ResetRef) -> bool {
        self.state.lock().await.registry.register_reset(action)
    }

    /// Registers an exerciser test and spawns its monitor loop.
    pub async fn register_test(&self, action: TestRef) -> bool {
        let mut st = self.state.lock().await;
        if !st.registry.register_test(action.clone()) {
            return false;
        }
        let monitor = Arc::new(TestMonitor::spawn(action.clone(), self.token.child_token()));
        st.tests.push(MonitoredTest { action, monitor });
        true
    }

    // --- session operations ---------------------------------------------

    /// Grants `user` master access.
    ///
    /// Refused while a session is active, the rig is in maintenance, or any
    /// exerciser test reports bad status. Access actions run in
    /// registration order; the first failure aborts the grant without
    /// unwinding earlier actions.
    pub async fn assign(&self, user: &str) -> bool {
        let mut st = self.state.lock().await;
        if st.session.is_some() || !monitor_good(&st) {
            tracing::warn!(user, "assign refused, rig unavailable");
            return false;
        }

        set_tests_enabled(&st, false);
        for action in st.registry.access_actions() {
            if !action.assign(user).await {
                self.record_failure(&mut st, ActionCategory::Access, &action);
                set_tests_enabled(&st, true);
                return false;
            }
        }

        st.session = Some(Session {
            master: user.to_string(),
            slaves: HashMap::new(),
        });
        tracing::info!(user, rig = %self.cfg.name, "session assigned");
        true
    }

    /// Terminates the session, revoking every user.
    ///
    /// Returns `false` when no session is active or when any revocation or
    /// reset action fails; the session is cleared regardless.
    pub async fn revoke(&self) -> bool {
        let mut st = self.state.lock().await;
        self.revoke_locked(&mut st).await
    }

    async fn revoke_locked(&self, st: &mut RigState) -> bool {
        let Some(session) = st.session.take() else {
            tracing::warn!("revoke refused, no session active");
            return false;
        };

        let mut revoked = true;

        // Snapshot taken by the take() above; slaves added concurrently
        // cannot appear because the state mutex is held throughout.
        for (slave, role) in &session.slaves {
            let passive = *role == Role::SlavePassive;
            for action in st.registry.slave_access_actions() {
                if !action.revoke(slave, passive).await {
                    self.record_failure(st, ActionCategory::SlaveAccess, &action);
                    revoked = false;
                }
            }
        }

        for action in st.registry.access_actions() {
            if !action.revoke(&session.master).await {
                self.record_failure(st, ActionCategory::Access, &action);
                revoked = false;
            }
        }

        for action in st.registry.reset_actions() {
            if !action.reset().await {
                self.record_failure(st, ActionCategory::Reset, &action);
                revoked = false;
            }
        }

        set_tests_enabled(st, true);
        tracing::info!(master = %session.master, rig = %self.cfg.name, revoked, "session revoked");
        revoked
    }

    /// Adds `user` as a collaborator at the requested tier.
    ///
    /// Refused when no session is active, when `user` is the master, or
    /// when `user` already holds the requested tier. A user at the other
    /// tier is revoked first, then re-granted.
    pub async fn add_slave(&self, user: &str, passive: bool) -> bool {
        let mut st = self.state.lock().await;
        let desired = if passive {
            Role::SlavePassive
        } else {
            Role::SlaveActive
        };

        let (is_master, held) = match &st.session {
            Some(session) => (session.master == user, session.slaves.get(user).copied()),
            None => return false,
        };
        if is_master {
            return false;
        }
        match held {
            Some(held) if held == desired => return false,
            Some(held) => {
                // Tier change: the old grant must come off cleanly before
                // the new one is applied.
                let was_passive = held == Role::SlavePassive;
                if !self.revoke_slave_locked(&mut st, user, was_passive).await {
                    tracing::warn!(user, "tier change aborted, revocation failed");
                    return false;
                }
            }
            None => {}
        }

        for action in st.registry.slave_access_actions() {
            if !action.assign(user, passive).await {
                self.record_failure(&mut st, ActionCategory::SlaveAccess, &action);
                return false;
            }
        }

        if let Some(session) = &mut st.session {
            session.slaves.insert(user.to_string(), desired);
        }
        tracing::info!(user, tier = desired.as_label(), "slave added");
        true
    }

    /// Removes collaborator `user` from the session.
    pub async fn revoke_slave(&self, user: &str) -> bool {
        let mut st = self.state.lock().await;
        let role = match &st.session {
            Some(session) => session.slaves.get(user).copied(),
            None => return false,
        };
        let Some(role) = role else {
            return false;
        };
        let passive = role == Role::SlavePassive;
        self.revoke_slave_locked(&mut st, user, passive).await
    }

    /// Removes `user` from the slave map first, then runs revocation
    /// actions; the user is out of the session even if an action fails.
    async fn revoke_slave_locked(&self, st: &mut RigState, user: &str, passive: bool) -> bool {
        if let Some(session) = &mut st.session {
            session.slaves.remove(user);
        }
        let mut revoked = true;
        for action in st.registry.slave_access_actions() {
            if !action.revoke(user, passive).await {
                self.record_failure(st, ActionCategory::SlaveAccess, &action);
                revoked = false;
            }
        }
        tracing::info!(user, revoked, "slave revoked");
        revoked
    }

    /// Delivers `message` to every session user.
    pub async fn notify(&self, message: &str) -> bool {
        let mut st = self.state.lock().await;
        let Some(session) = &st.session else {
            return false;
        };
        let mut users: Vec<String> = Vec::with_capacity(1 + session.slaves.len());
        users.push(session.master.clone());
        users.extend(session.slaves.keys().cloned());

        let mut delivered = true;
        for action in st.registry.notify_actions() {
            if !action.notify(message, &users).await {
                self.record_failure(&mut st, ActionCategory::Notify, &action);
                delivered = false;
            }
        }
        delivered
    }

    // --- maintenance and monitoring -------------------------------------

    /// Puts the rig into or takes it out of maintenance.
    ///
    /// `offline = true` terminates any active session first (best effort)
    /// and leaves the exerciser tests running only if `run_tests` is set.
    /// Always returns `true`; callers historically ignore the result.
    pub async fn set_maintenance(&self, offline: bool, reason: &str, run_tests: bool) -> bool {
        let mut st = self.state.lock().await;
        if offline {
            if st.session.is_some() {
                self.revoke_locked(&mut st).await;
            }
            st.maintenance = Some(reason.to_string());
            set_tests_enabled(&st, run_tests);
            tracing::warn!(reason, run_tests, "rig placed in maintenance");
        } else {
            st.maintenance = None;
            set_tests_enabled(&st, true);
            tracing::info!("rig taken out of maintenance");
        }
        true
    }

    /// Re-paces every exerciser test. Always returns `true`.
    pub async fn set_test_interval(&self, minutes: u32) -> bool {
        let st = self.state.lock().await;
        for test in &st.tests {
            test.action.set_interval(minutes);
        }
        true
    }

    /// Resumes all exerciser test loops.
    pub async fn start_tests(&self) {
        let st = self.state.lock().await;
        set_tests_enabled(&st, true);
    }

    /// Pauses all exerciser test loops.
    pub async fn stop_tests(&self) {
        let st = self.state.lock().await;
        set_tests_enabled(&st, false);
    }

    /// `true` while the rig is out of maintenance and every exerciser test
    /// passes.
    pub async fn is_monitor_status_good(&self) -> bool {
        let st = self.state.lock().await;
        monitor_good(&st)
    }

    /// Why the monitor status is bad: every failing test's reason followed
    /// by the maintenance reason, or `None` while the status is good.
    pub async fn monitor_reason(&self) -> Option<String> {
        let st = self.state.lock().await;
        let mut reasons = String::new();
        for test in &st.tests {
            if !test.action.status() {
                let why = test
                    .action
                    .reason()
                    .unwrap_or_else(|| String::from("unknown"));
                reasons.push_str(test.action.action_type());
                reasons.push_str(": ");
                reasons.push_str(&why);
                reasons.push(' ');
            }
        }
        if let Some(reason) = &st.maintenance {
            reasons.push_str(reason);
        }
        (!reasons.is_empty()).then_some(reasons)
    }

    pub async fn is_not_in_maintenance(&self) -> bool {
        self.state.lock().await.maintenance.is_none()
    }

    pub async fn maintenance_reason(&self) -> Option<String> {
        self.state.lock().await.maintenance.clone()
    }

    /// Most recent failure reason recorded under `category`.
    pub async fn action_failure_reason(&self, category: ActionCategory) -> Option<String> {
        self.state
            .lock()
            .await
            .registry
            .last_failure(category)
            .map(str::to_string)
    }

    // --- session queries -------------------------------------------------

    pub async fn is_session_active(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    /// The tier `user` holds in the current session.
    pub async fn in_session(&self, user: &str) -> Role {
        let st = self.state.lock().await;
        match &st.session {
            Some(session) if session.master == user => Role::Master,
            Some(session) => session.slaves.get(user).copied().unwrap_or(Role::NotIn),
            None => Role::NotIn,
        }
    }

    /// `true` if `user` holds at least the `required` tier.
    pub async fn has_permission(&self, user: &str, required: Role) -> bool {
        self.in_session(user).await.dominates(required)
    }

    /// Session users, master first.
    pub async fn session_users(&self) -> Vec<String> {
        let st = self.state.lock().await;
        match &st.session {
            Some(session) => {
                let mut users = vec![session.master.clone()];
                users.extend(session.slaves.keys().cloned());
                users
            }
            None => Vec::new(),
        }
    }

    /// Stops every test monitor; the rig is done for the process lifetime.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    // --- internals --------------------------------------------------------

    /// Records a failure and promotes to maintenance at the threshold.
    ///
    /// Counts are per action instance and never reset, so an action at the
    /// threshold re-trips maintenance on every subsequent failure.
    fn record_failure<T: Action + ?Sized>(
        &self,
        st: &mut RigState,
        category: ActionCategory,
        action: &Arc<T>,
    ) {
        let count = st.registry.record_failure(category, action);
        if count >= self.cfg.action_failure_threshold {
            let why = st
                .registry
                .last_failure(category)
                .unwrap_or("unknown")
                .to_string();
            let reason = format!("{} action failed with reason {}", category.label(), why);
            tracing::error!(count, reason = %reason, "failure threshold reached");
            st.maintenance = Some(reason);
        }
    }
}

fn set_tests_enabled(st: &RigState, enabled: bool) {
    for test in &st.tests {
        test.monitor.set_enabled(enabled);
    }
}

fn monitor_good(st: &RigState) -> bool {
    st.maintenance.is_none() && st.tests.iter().all(|t| t.action.status())
}
