mod directory;
mod ledger;
pub mod lock;
mod runner;

pub use directory::{split_sql_statements, DirectorySource, SCHEMA_TOKEN};
pub use ledger::{VersionLedger, DESCRIPTION_LENGTH};
pub use lock::LockAttempt;
pub use runner::{MigrationRunner, MigrationRunnerBuilder};
