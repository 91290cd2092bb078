use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Target database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Provider identifier (`postgres`, `mysql`, `sqlite`).
    pub provider: String,

    /// Connection URL, passed to the driver untouched.
    pub url: String,

    /// Schema the ledger and migrations target.
    #[serde(default)]
    pub schema: Option<String>,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            url: String::new(),
            schema: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    30
}
