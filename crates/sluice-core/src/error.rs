use std::time::Duration;

use thiserror::Error;

/// Core error type for sluice operations.
#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported provider: '{0}'")]
    UnsupportedProvider(String),

    #[error("Duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: i64,
        first: String,
        second: String,
    },

    #[error("Service already bound: {0}")]
    DuplicateBinding(&'static str),

    #[error("Service not bound: {0}")]
    UnresolvedBinding(&'static str),

    #[error("Timed out after {waited:?} waiting for migration lock '{lock}'")]
    LockTimeout { lock: String, waited: Duration },

    #[error("Migration {version} ({description}) failed: {source}")]
    MigrationFailed {
        version: i64,
        description: String,
        #[source]
        source: Box<SluiceError>,
    },

    #[error("Migration run cancelled after {applied} migration(s)")]
    Cancelled { applied: usize },

    #[error("Migration {version} cannot be reversed: {reason}")]
    IrreversibleMigration { version: i64, reason: String },

    #[error("Invalid migration: {0}")]
    InvalidMigration(String),

    #[error("Failed to execute `{sql}`: {source}")]
    Statement {
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SluiceError {
    /// Errors raised before any database access because the run was misconfigured.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SluiceError::Config(_) | SluiceError::UnsupportedProvider(_)
        )
    }

    /// Catalog or registry integrity violations.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            SluiceError::DuplicateVersion { .. }
                | SluiceError::DuplicateBinding(_)
                | SluiceError::UnresolvedBinding(_)
        )
    }

    /// The failing migration's version, if this error came from applying one.
    pub fn failed_version(&self) -> Option<i64> {
        match self {
            SluiceError::MigrationFailed { version, .. } => Some(*version),
            _ => None,
        }
    }
}

/// Result type alias using SluiceError.
pub type Result<T> = std::result::Result<T, SluiceError>;
