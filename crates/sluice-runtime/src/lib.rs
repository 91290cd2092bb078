pub mod dialect;
pub mod migrations;

pub use dialect::{
    Dialect, DialectRegistry, LockKey, MySqlDialect, PostgresDialect, SchemaSession,
    SqliteDialect, Statement, Value,
};
pub use migrations::{DirectorySource, MigrationRunner, MigrationRunnerBuilder, VersionLedger};
