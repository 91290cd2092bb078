pub mod config;
pub mod error;
pub mod migration;
pub mod run;
pub mod schema;
pub mod services;
pub mod target;

pub use config::{LedgerTableNames, LockConfig, MigratorConfig};
pub use error::{Result, SluiceError};
pub use migration::{Catalog, CodeSource, Migration, MigrationSource, MigrationUnit};
pub use run::{
    LedgerEntry, MigrationStatus, RollbackReport, RunEvent, RunObserver, RunOutcome, RunReport,
    RunState,
};
pub use schema::{ColumnDef, ColumnType, SchemaBuilder, SchemaOperation};
pub use services::{SchemaName, ServiceRegistry};
pub use target::TargetIdentity;
