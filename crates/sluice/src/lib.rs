//! sluice - versioned schema migrations for PostgreSQL, MySQL and SQLite.
//!
//! Migrations are discovered from code ([`CodeSource`]) or SQL files
//! ([`DirectorySource`]), ordered by version and applied by a
//! [`MigrationRunner`] that holds a per-target lock for the whole run.
//!
//! ```no_run
//! use sluice::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let config = MigratorConfig::from_file("sluice.toml")?;
//! let mut runner = MigrationRunner::from_config(&config).build()?;
//! let report = runner.migrate().await?;
//! println!("now at version {:?}", report.max_version);
//! # Ok(())
//! # }
//! ```

pub use sluice_core;
pub use sluice_runtime;

pub use sluice_core::{
    Catalog, CodeSource, LedgerEntry, Migration, MigrationSource, MigrationUnit, MigratorConfig,
    Result, RunEvent, RunObserver, RunOutcome, RunReport, SchemaBuilder, SchemaName,
    ServiceRegistry, SluiceError, TargetIdentity,
};
pub use sluice_runtime::{
    DialectRegistry, DirectorySource, MigrationRunner, MigrationRunnerBuilder,
};

pub mod prelude {
    pub use chrono::{DateTime, Utc};
    pub use tokio_util::sync::CancellationToken;

    pub use sluice_core::config::{LedgerTableNames, LockConfig, MigratorConfig};
    pub use sluice_core::error::{Result, SluiceError};
    pub use sluice_core::migration::{CodeSource, Migration, MigrationSource, MigrationUnit};
    pub use sluice_core::run::{
        MigrationStatus, RollbackReport, RunEvent, RunObserver, RunOutcome, RunReport,
    };
    pub use sluice_core::schema::{ColumnType, SchemaBuilder};
    pub use sluice_core::services::{SchemaName, ServiceRegistry};
    pub use sluice_core::target::TargetIdentity;
    pub use sluice_runtime::{DialectRegistry, DirectorySource, MigrationRunner};
}
