use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What to do when a blog is asked to sync while a pass is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentionMode {
    /// Wait for the running pass, then run.
    #[default]
    Queue,
    /// Fail fast with [`crate::sync::SyncError::LockContention`].
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub contention: ContentionMode,
    /// Upper bound for reading and building a single file.
    pub operation_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contention: ContentionMode::Queue,
            operation_timeout_secs: 30,
        }
    }
}

impl SyncConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs.max(1))
    }

    pub fn trace_loaded(&self) {
        info!(
            contention = ?self.contention,
            operation_timeout_secs = self.operation_timeout_secs,
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}
