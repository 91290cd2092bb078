use serde::{Deserialize, Serialize};

/// Names of the ledger table, its columns and its companions.
///
/// Every name can be overridden on its own; missing keys keep their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerTableNames {
    pub table: String,
    pub version_column: String,
    pub description_column: String,
    pub unique_index: String,
    pub applied_on_column: String,
    /// Table backing the run-lock on dialects without advisory locks.
    pub lock_table: String,
}

impl Default for LedgerTableNames {
    fn default() -> Self {
        Self {
            table: "VersionInfo".to_string(),
            version_column: "Version".to_string(),
            description_column: "Description".to_string(),
            unique_index: "UC_Version".to_string(),
            applied_on_column: "AppliedOn".to_string(),
            lock_table: "VersionInfoLock".to_string(),
        }
    }
}
