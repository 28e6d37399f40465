//! # Action registry and failure tracking.
//!
//! Keeps the per-category ordered action lists and the failure counters
//! feeding the maintenance promotion rule.
//!
//! ## Rules
//!
//! - Actions run in registration order within their category.
//! - Registering the same action instance twice under one category is
//!   refused; registration reports whether the action was accepted.
//! - Each `false` outcome increments that instance's failure counter; when
//!   the counter reaches the configured threshold the rig is promoted to
//!   maintenance. Counters persist for the instance's lifetime and are never
//!   cleared, so a flaky action keeps tripping maintenance on every further
//!   failure once at the threshold.

use std::collections::HashMap;
use std::sync::Arc;

use super::action::{
    AccessRef, Action, ActionCategory, NotifyRef, ResetRef, SlaveAccessRef, TestRef,
};

/// Identity of an action instance: the data pointer behind its `Arc`.
///
/// Two clones of one `Arc` share a counter; two separately constructed
/// instances of the same type do not.
fn identity<T: Action + ?Sized>(action: &Arc<T>) -> usize {
    Arc::as_ptr(action) as *const () as usize
}

/// Per-category action lists plus failure bookkeeping.
///
/// Owned by the rig state mutex; all methods take `&mut self` and none
/// await, so the registry never holds a lock across a suspension point.
#[derive(Default)]
pub struct ActionRegistry {
    access: Vec<AccessRef>,
    slave_access: Vec<SlaveAccessRef>,
    notify: Vec<NotifyRef>,
    reset: Vec<ResetRef>,
    test: Vec<TestRef>,
    /// Failure count per action instance, keyed by `Arc` data pointer.
    failures: HashMap<usize, u32>,
    /// Most recent failure reason seen per category.
    last_failure: HashMap<ActionCategory, String>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `action` to its category list.
    ///
    /// Returns `false` when this exact instance is already registered.
    pub fn register_access(&mut self, action: AccessRef) -> bool {
        if self.access.iter().any(|a| Arc::ptr_eq(a, &action)) {
            tracing::warn!(action = action.action_type(), "duplicate registration refused");
            return false;
        }
        self.access.push(action);
        true
    }

    pub fn register_slave_access(&mut self, action: SlaveAccessRef) -> bool {
        if self.slave_access.iter().any(|a| Arc::ptr_eq(a, &action)) {
            tracing::warn!(action = action.action_type(), "duplicate registration refused");
            return false;
        }
        self.slave_access.push(action);
        true
    }

    pub fn register_notify(&mut self, action: NotifyRef) -> bool {
        if self.notify.iter().any(|a| Arc::ptr_eq(a, &action)) {
            tracing::warn!(action = action.action_type(), "duplicate registration refused");
            return false;
        }
        self.notify.push(action);
        true
    }

    pub fn register_reset(&mut self, action: ResetRef) -> bool {
        if self.reset.iter().any(|a| Arc::ptr_eq(a, &action)) {
            tracing::warn!(action = action.action_type(), "duplicate registration refused");
            return false;
        }
        self.reset.push(action);
        true
    }

    pub fn register_test(&mut self, action: TestRef) -> bool {
        if self.test.iter().any(|a| Arc::ptr_eq(a, &action)) {
            tracing::warn!(action = action.action_type(), "duplicate registration refused");
            return false;
        }
        self.test.push(action);
        true
    }

    /// Snapshot of a category's actions, in registration order.
    pub fn access_actions(&self) -> Vec<AccessRef> {
        self.access.clone()
    }

    pub fn slave_access_actions(&self) -> Vec<SlaveAccessRef> {
        self.slave_access.clone()
    }

    pub fn notify_actions(&self) -> Vec<NotifyRef> {
        self.notify.clone()
    }

    pub fn reset_actions(&self) -> Vec<ResetRef> {
        self.reset.clone()
    }

    /// Records a failure for `action`, returning the updated count.
    ///
    /// Also remembers the failure reason as the category's most recent one.
    pub fn record_failure<T: Action + ?Sized>(
        &mut self,
        category: ActionCategory,
        action: &Arc<T>,
    ) -> u32 {
        let reason = action
            .failure_reason()
            .unwrap_or_else(|| String::from("unknown"));
        tracing::warn!(
            category = category.label(),
            action = action.action_type(),
            reason = %reason,
            "action failed"
        );
        self.last_failure.insert(category, reason);
        let count = self.failures.entry(identity(action)).or_insert(0);
        *count += 1;
        *count
    }

    /// Failure count recorded so far for `action`.
    pub fn failure_count<T: Action + ?Sized>(&self, action: &Arc<T>) -> u32 {
        self.failures.get(&identity(action)).copied().unwrap_or(0)
    }

    /// Most recent failure reason recorded under `category`.
    pub fn last_failure(&self, category: ActionCategory) -> Option<&str> {
        self.last_failure.get(&category).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::actions::action::{AccessAction, Action, ActionCategory};

    struct CountingAccess {
        calls: AtomicU32,
        ok: bool,
    }

    impl CountingAccess {
        fn new(ok: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                ok,
            })
        }
    }

    impl Action for CountingAccess {
        fn action_type(&self) -> &str {
            "counting-access"
        }

        fn failure_reason(&self) -> Option<String> {
            (!self.ok).then(|| String::from("always fails"))
        }
    }

    #[async_trait]
    impl AccessAction for CountingAccess {
        async fn assign(&self, _user: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ok
        }

        async fn revoke(&self, _user: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ok
        }
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let mut reg = ActionRegistry::new();
        let action = CountingAccess::new(true);
        assert!(reg.register_access(action.clone()));
        assert!(!reg.register_access(action.clone()));
        assert_eq!(reg.access_actions().len(), 1);
    }

    #[test]
    fn distinct_instances_of_one_type_both_register() {
        let mut reg = ActionRegistry::new();
        assert!(reg.register_access(CountingAccess::new(true)));
        assert!(reg.register_access(CountingAccess::new(true)));
        assert_eq!(reg.access_actions().len(), 2);
    }

    #[test]
    fn failures_accumulate_per_instance() {
        let mut reg = ActionRegistry::new();
        let flaky = CountingAccess::new(false);
        let solid = CountingAccess::new(true);
        reg.register_access(flaky.clone());
        reg.register_access(solid.clone());

        assert_eq!(reg.record_failure(ActionCategory::Access, &flaky), 1);
        assert_eq!(reg.record_failure(ActionCategory::Access, &flaky), 2);
        assert_eq!(reg.failure_count(&flaky), 2);
        assert_eq!(reg.failure_count(&solid), 0);
        assert_eq!(
            reg.last_failure(ActionCategory::Access),
            Some("always fails")
        );
    }
}
