use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Run-lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long to wait for a concurrent runner before giving up.
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,

    /// Delay between acquisition attempts.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Age after which a row-based lock counts as abandoned and may be taken
    /// over. `0` never takes over. Session-scoped locks end with their
    /// connection and ignore this.
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0).then(|| Duration::from_secs(self.stale_after_secs))
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_lock_timeout(),
            poll_interval_ms: default_poll_interval(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_lock_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    250
}

fn default_stale_after() -> u64 {
    3600
}
