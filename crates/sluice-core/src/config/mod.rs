mod database;
mod ledger;
mod lock;
mod logging;

pub use database::DatabaseConfig;
pub use ledger::LedgerTableNames;
pub use lock::LockConfig;
pub use logging::{LogFormat, LoggingConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SluiceError};

/// Root configuration for a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Target database.
    pub database: DatabaseConfig,

    /// Ledger table and column names.
    #[serde(default)]
    pub ledger: LedgerTableNames,

    /// Run-lock behaviour.
    #[serde(default)]
    pub lock: LockConfig,

    /// Where SQL migrations live.
    #[serde(default)]
    pub migrations: MigrationsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MigratorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SluiceError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content)?;

        toml::from_str(&content)
            .map_err(|e| SluiceError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Configuration for a provider and connection string with every other setting defaulted.
    pub fn new(provider: &str, url: &str) -> Self {
        Self {
            database: DatabaseConfig {
                provider: provider.to_string(),
                url: url.to_string(),
                ..Default::default()
            },
            ledger: LedgerTableNames::default(),
            lock: LockConfig::default(),
            migrations: MigrationsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Migration source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding `<version>_<description>.sql` files.
    #[serde(default = "default_migrations_dir")]
    pub dir: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_migrations_dir(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| SluiceError::Config(e.to_string()))?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    Ok(result)
}
