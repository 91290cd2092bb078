//! The version ledger: one row per applied migration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sluice_core::config::LedgerTableNames;
use sluice_core::error::Result;
use sluice_core::run::LedgerEntry;
use tracing::debug;

use crate::dialect::{Dialect, SchemaSession, Statement, Value};

/// Widest description the ledger stores.
pub const DESCRIPTION_LENGTH: u32 = 1024;

/// Reads and writes the ledger table of one target.
///
/// Writes are returned as [`Statement`]s so the runner can execute them in
/// the same transaction as the migration they record.
#[derive(Clone)]
pub struct VersionLedger {
    dialect: Arc<dyn Dialect>,
    names: LedgerTableNames,
    schema: Option<String>,
}

impl VersionLedger {
    pub fn new(dialect: Arc<dyn Dialect>, names: LedgerTableNames, schema: Option<&str>) -> Self {
        Self {
            dialect,
            names,
            schema: schema.map(str::to_string),
        }
    }

    pub fn names(&self) -> &LedgerTableNames {
        &self.names
    }

    /// Quoted, schema-qualified ledger table.
    pub fn table(&self) -> String {
        self.dialect.qualify(self.schema.as_deref(), &self.names.table)
    }

    /// Quoted, schema-qualified lock table.
    pub fn lock_table(&self) -> String {
        self.dialect
            .qualify(self.schema.as_deref(), &self.names.lock_table)
    }

    /// Stable name of the run-lock guarding this ledger.
    pub fn lock_name(&self) -> String {
        format!(
            "sluice:{}.{}",
            self.schema.as_deref().unwrap_or_default(),
            self.names.table
        )
    }

    fn column(&self, name: &str) -> String {
        self.dialect.quote(name)
    }

    /// DDL creating the schema (when supported and configured) and the ledger table.
    pub fn create_statements(&self) -> Vec<Statement> {
        let mut statements = Vec::new();

        if let Some(schema) = &self.schema {
            if self.dialect.supports_schemas() {
                statements.push(Statement::new(format!(
                    "CREATE SCHEMA IF NOT EXISTS {}",
                    self.dialect.quote(schema)
                )));
            }
        }

        statements.push(Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {} BIGINT NOT NULL,\n    {} {} NOT NULL,\n    {} VARCHAR({}),\n    CONSTRAINT {} UNIQUE ({})\n)",
            self.table(),
            self.column(&self.names.version_column),
            self.column(&self.names.applied_on_column),
            self.dialect.timestamp_type(),
            self.column(&self.names.description_column),
            DESCRIPTION_LENGTH,
            self.column(&self.names.unique_index),
            self.column(&self.names.version_column),
        )));

        statements
    }

    fn max_version_sql(&self) -> String {
        format!(
            "SELECT MAX({}) AS max_version FROM {}",
            self.column(&self.names.version_column),
            self.table()
        )
    }

    fn entries_sql(&self) -> String {
        format!(
            "SELECT {} AS version, {} AS description, {} AS applied_on FROM {} ORDER BY {}",
            self.column(&self.names.version_column),
            self.column(&self.names.description_column),
            self.column(&self.names.applied_on_column),
            self.table(),
            self.column(&self.names.version_column),
        )
    }

    /// INSERT recording `version` as applied.
    pub fn record_statement(
        &self,
        version: i64,
        description: &str,
        applied_on: DateTime<Utc>,
    ) -> Statement {
        let description: String = description
            .chars()
            .take(DESCRIPTION_LENGTH as usize)
            .collect();

        Statement::new(format!(
            "INSERT INTO {} ({}, {}, {}) VALUES ({}, {}, {})",
            self.table(),
            self.column(&self.names.version_column),
            self.column(&self.names.applied_on_column),
            self.column(&self.names.description_column),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            self.dialect.placeholder(3),
        ))
        .bind(Value::Int(version))
        .bind(Value::Timestamp(applied_on))
        .bind(Value::Text(description))
    }

    /// DELETE forgetting `version`. Used by rollback only.
    pub fn remove_statement(&self, version: i64) -> Statement {
        Statement::new(format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table(),
            self.column(&self.names.version_column),
            self.dialect.placeholder(1),
        ))
        .bind(Value::Int(version))
    }

    /// Create the ledger table if it does not exist yet. Safe to call on every run.
    pub async fn ensure_exists(&self, session: &mut dyn SchemaSession) -> Result<()> {
        for statement in self.create_statements() {
            session.execute(&statement).await?;
        }
        debug!("Ledger table {} ready", self.table());
        Ok(())
    }

    /// Highest applied version, or `None` for an empty ledger.
    pub async fn max_applied_version(
        &self,
        session: &mut dyn SchemaSession,
    ) -> Result<Option<i64>> {
        session.fetch_max_version(&self.max_version_sql()).await
    }

    /// Every ledger row, ascending by version.
    pub async fn all_applied(&self, session: &mut dyn SchemaSession) -> Result<Vec<LedgerEntry>> {
        session.fetch_ledger(&self.entries_sql()).await
    }
}
