//! # Rig configuration.
//!
//! All fields are plain data; construct with struct literal syntax over
//! [`RigConfig::default`] and override what the deployment needs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a [`Rig`](crate::rig::Rig).
#[derive(Debug, Clone)]
pub struct RigConfig {
    /// Rig name as registered with the scheduling server.
    pub name: String,

    /// Rig type this instance belongs to.
    pub rig_type: String,

    /// Capability tokens advertised for scheduling matches.
    pub capabilities: Vec<String>,

    /// Arbitrary deployment attributes, queryable by key.
    pub attributes: HashMap<String, String>,

    /// Consecutive-failure count at which a failing action puts the rig
    /// into maintenance.
    ///
    /// Default: 3.
    pub action_failure_threshold: u32,

    /// Batch execution settings.
    pub batch: BatchConfig,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            name: String::from("rig"),
            rig_type: String::from("rig-type"),
            capabilities: Vec::new(),
            attributes: HashMap::new(),
            action_failure_threshold: 3,
            batch: BatchConfig::default(),
        }
    }
}

impl RigConfig {
    /// Looks up a deployment attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Settings for out-of-process batch control.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory under which per-invocation working directories are created.
    pub working_dir_base: PathBuf,

    /// How long a spawned batch process may take to leave setup before the
    /// rig gives up on it.
    ///
    /// Default: 60 seconds.
    pub start_timeout: Duration,

    /// How long an abort waits for the process to die before reporting
    /// failure.
    ///
    /// Default: 10 seconds.
    pub abort_timeout: Duration,

    /// Pacing between startup and abort progress checks.
    ///
    /// Default: 1 second. Tests shorten this to keep timeout paths fast.
    pub poll_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            working_dir_base: std::env::temp_dir(),
            start_timeout: Duration::from_secs(60),
            abort_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        }
    }
}
