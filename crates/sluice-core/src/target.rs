use std::fmt;

use crate::config::DatabaseConfig;

/// The physical database (and optional schema) a runner migrates.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    pub provider: String,
    pub connection_string: String,
    pub schema: Option<String>,
}

impl TargetIdentity {
    pub fn new(provider: &str, connection_string: &str, schema: Option<&str>) -> Self {
        Self {
            provider: provider.to_string(),
            connection_string: connection_string.to_string(),
            schema: schema.map(str::to_string),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(&config.provider, &config.url, config.schema.as_deref())
    }
}

// Connection strings carry credentials; keep them out of logs.
impl fmt::Debug for TargetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetIdentity")
            .field("provider", &self.provider)
            .field("connection_string", &"<redacted>")
            .field("schema", &self.schema)
            .finish()
    }
}
