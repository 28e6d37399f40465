//! Pluggable device actions: capability traits, the per-category registry,
//! and the supervised exerciser-test monitor.

mod action;
mod monitor;
mod registry;

pub use action::{
    AccessAction, AccessRef, Action, ActionCategory, NotifyAction, NotifyRef, ResetAction,
    ResetRef, SlaveAccessAction, SlaveAccessRef, TestAction, TestRef,
};
pub use monitor::TestMonitor;
pub use registry::ActionRegistry;

pub(crate) use monitor::MonitoredTest;
