//! Database dialects.
//!
//! A [`Dialect`] renders abstract schema operations into SQL for one backend
//! and opens [`SchemaSession`]s, dedicated connections that own the run-lock
//! and execute migrations transactionally.

/// The [`SchemaSession`] methods every sqlx-backed session shares.
///
/// Expands inside `impl SchemaSession for ..` on a type with a `conn` field
/// holding the driver connection; only the lock methods are left to write.
macro_rules! sqlx_session_queries {
    ($db:ty) => {
        fn execute<'a>(
            &'a mut self,
            statement: &'a $crate::dialect::Statement,
        ) -> $crate::dialect::BoxFuture<'a, ::sluice_core::error::Result<u64>> {
            Box::pin(async move {
                ::tracing::debug!(sql = %statement.sql, "Executing");
                let result = $crate::dialect::bind_values::<$db>(statement)
                    .execute(&mut self.conn)
                    .await
                    .map_err(|source| ::sluice_core::error::SluiceError::Statement {
                        sql: statement.sql.clone(),
                        source,
                    })?;
                Ok(result.rows_affected())
            })
        }

        fn fetch_max_version<'a>(
            &'a mut self,
            sql: &'a str,
        ) -> $crate::dialect::BoxFuture<'a, ::sluice_core::error::Result<Option<i64>>> {
            Box::pin(async move {
                let max = ::sqlx::query_scalar::<$db, Option<i64>>(sql)
                    .fetch_one(&mut self.conn)
                    .await?;
                Ok(max)
            })
        }

        fn fetch_ledger<'a>(
            &'a mut self,
            sql: &'a str,
        ) -> $crate::dialect::BoxFuture<
            'a,
            ::sluice_core::error::Result<Vec<::sluice_core::run::LedgerEntry>>,
        > {
            Box::pin(async move {
                let rows = ::sqlx::query::<$db>(sql).fetch_all(&mut self.conn).await?;
                rows.iter()
                    .map(|row| {
                        Ok(::sluice_core::run::LedgerEntry {
                            version: ::sqlx::Row::try_get(row, "version")?,
                            description: ::sqlx::Row::try_get::<Option<String>, _>(
                                row,
                                "description",
                            )?
                            .unwrap_or_default(),
                            applied_on: ::sqlx::Row::try_get(row, "applied_on")?,
                        })
                    })
                    .collect()
            })
        }

        fn apply<'a>(
            &'a mut self,
            statements: &'a [$crate::dialect::Statement],
        ) -> $crate::dialect::BoxFuture<'a, ::sluice_core::error::Result<()>> {
            Box::pin(async move {
                let mut tx = ::sqlx::Connection::begin(&mut self.conn).await?;
                for statement in statements {
                    ::tracing::debug!(sql = %statement.sql, "Executing in transaction");
                    let executed = $crate::dialect::bind_values::<$db>(statement)
                        .execute(&mut *tx)
                        .await;
                    if let Err(source) = executed {
                        if let Err(e) = tx.rollback().await {
                            ::tracing::warn!("Failed to roll back migration transaction: {}", e);
                        }
                        return Err(::sluice_core::error::SluiceError::Statement {
                            sql: statement.sql.clone(),
                            source,
                        });
                    }
                }
                tx.commit().await?;
                Ok(())
            })
        }

        fn close(
            self: Box<Self>,
        ) -> $crate::dialect::BoxFuture<'static, ::sluice_core::error::Result<()>> {
            Box::pin(async move {
                ::sqlx::Connection::close(self.conn).await?;
                Ok(())
            })
        }
    };
}

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sluice_core::config::LockConfig;
use sluice_core::error::{Result, SluiceError};
use sluice_core::run::LedgerEntry;
use sluice_core::schema::{ColumnDef, ColumnType, IndexDef, SchemaOperation, TableDef, TableName};
use sqlx::database::HasStatementCache;
use sqlx::query::Query;
use sqlx::{Database, Encode, Type};

/// Type alias for the futures returned by dialect sessions.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// SQL plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: Value) -> Self {
        self.params.push(value);
        self
    }
}

/// Build an unprepared query with the statement's parameters bound in order.
pub(crate) fn bind_values<'q, DB>(
    statement: &'q Statement,
) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database + HasStatementCache,
    i64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    DateTime<Utc>: Encode<'q, DB> + Type<DB>,
{
    let mut query = sqlx::query::<DB>(&statement.sql).persistent(false);
    for param in &statement.params {
        query = match param {
            Value::Int(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Timestamp(v) => query.bind(*v),
        };
    }
    query
}

/// Identifies the run-lock of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockKey {
    /// Stable, human-readable name (`sluice:<schema>.<table>`).
    pub name: String,
    /// 64-bit key derived from `name`, for advisory-lock APIs.
    pub id: i64,
    /// Qualified, quoted lock table for row-based locking.
    pub table: String,
    /// Identifies this runner as the lock holder.
    pub owner: String,
}

impl LockKey {
    pub fn new(name: String, table: String, owner: String) -> Self {
        let id = fnv1a(name.as_bytes()) as i64;
        Self {
            name,
            id,
            table,
            owner,
        }
    }

    /// Name shortened to fit MySQL's 64 character lock names.
    pub fn short_name(&self) -> String {
        format!("sluice_{:016x}", self.id as u64)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// A dedicated connection to the target database.
pub trait SchemaSession: Send {
    /// Execute one statement outside any explicit transaction.
    fn execute<'a>(&'a mut self, statement: &'a Statement) -> BoxFuture<'a, Result<u64>>;

    /// Run a single-column `MAX(...)` query.
    fn fetch_max_version<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Option<i64>>>;

    /// Run a query selecting `version`, `description` and `applied_on` columns.
    fn fetch_ledger<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, Result<Vec<LedgerEntry>>>;

    /// Execute all statements in one transaction. Nothing is committed unless
    /// every statement succeeds.
    fn apply<'a>(&'a mut self, statements: &'a [Statement]) -> BoxFuture<'a, Result<()>>;

    /// Try once to take the run-lock. `Ok(false)` means another runner holds it.
    fn try_lock<'a>(&'a mut self, key: &'a LockKey) -> BoxFuture<'a, Result<bool>>;

    fn unlock<'a>(&'a mut self, key: &'a LockKey) -> BoxFuture<'a, Result<()>>;

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// SQL generation and connection capability of one backend.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether tables can be placed in a named schema.
    fn supports_schemas(&self) -> bool;

    fn quote(&self, identifier: &str) -> String;

    fn column_type(&self, column_type: &ColumnType) -> String;

    /// Column type used for the ledger's applied-on timestamp.
    fn timestamp_type(&self) -> &'static str;

    /// Positional parameter placeholder, 1-based.
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Open a dedicated session. `lock` tunes backends whose run-lock is
    /// not tied to the connection.
    fn connect<'a>(
        &'a self,
        connection_string: &'a str,
        lock: &'a LockConfig,
    ) -> BoxFuture<'a, Result<Box<dyn SchemaSession>>>;

    /// Quote and, where supported, schema-qualify a name.
    fn qualify(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) if self.supports_schemas() => {
                format!("{}.{}", self.quote(schema), self.quote(name))
            }
            _ => self.quote(name),
        }
    }

    fn table(&self, table: &TableName) -> String {
        self.qualify(table.schema.as_deref(), &table.name)
    }

    fn column_definition(&self, column: &ColumnDef) -> String {
        let mut parts = vec![
            self.quote(&column.name),
            self.column_type(&column.column_type),
        ];

        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }

        if column.unique && !column.primary_key {
            parts.push("UNIQUE".to_string());
        }

        if let Some(default) = &column.default {
            parts.push(format!("DEFAULT {}", default));
        }

        parts.join(" ")
    }

    fn create_table(&self, def: &TableDef) -> String {
        let mut parts: Vec<String> = def
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();

        let key = def.primary_key();
        if !key.is_empty() {
            let columns: Vec<String> = key.iter().map(|c| self.quote(c)).collect();
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.quote(&format!("PK_{}", def.table.name)),
                columns.join(", ")
            ));
        }

        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.table(&def.table),
            parts.join(",\n    ")
        )
    }

    fn create_index(&self, index: &IndexDef) -> String {
        let columns: Vec<String> = index.columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote(&index.name),
            self.table(&index.table),
            columns.join(", ")
        )
    }

    fn drop_index(&self, _table: &TableName, name: &str) -> String {
        format!("DROP INDEX {}", self.quote(name))
    }

    /// Render one operation into the statements that perform it.
    fn render(&self, operation: &SchemaOperation) -> Result<Vec<String>> {
        let sql = match operation {
            SchemaOperation::CreateSchema { name } => {
                if !self.supports_schemas() {
                    return Ok(Vec::new());
                }
                format!("CREATE SCHEMA IF NOT EXISTS {}", self.quote(name))
            }
            SchemaOperation::DropSchema { name } => {
                if !self.supports_schemas() {
                    return Ok(Vec::new());
                }
                format!("DROP SCHEMA {}", self.quote(name))
            }
            SchemaOperation::CreateTable(def) => {
                if def.columns.is_empty() {
                    return Err(SluiceError::InvalidMigration(format!(
                        "table {} has no columns",
                        def.table
                    )));
                }
                self.create_table(def)
            }
            SchemaOperation::DropTable { table } => format!("DROP TABLE {}", self.table(table)),
            SchemaOperation::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.table(table),
                self.column_definition(column)
            ),
            SchemaOperation::DropColumn { table, column } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                self.table(table),
                self.quote(column)
            ),
            SchemaOperation::CreateIndex(index) => self.create_index(index),
            SchemaOperation::DropIndex { table, name } => self.drop_index(table, name),
            SchemaOperation::Sql(sql) => sql.clone(),
        };

        Ok(vec![sql])
    }
}

/// Dialects keyed by provider identifier.
#[derive(Clone, Default)]
pub struct DialectRegistry {
    dialects: HashMap<String, Arc<dyn Dialect>>,
}

impl DialectRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in PostgreSQL, MySQL and SQLite dialects.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        let postgres: Arc<dyn Dialect> = Arc::new(PostgresDialect);
        registry.register("postgres", postgres.clone());
        registry.register("postgresql", postgres.clone());
        registry.register("pg", postgres);
        registry.register("mysql", Arc::new(MySqlDialect));
        registry.register("sqlite", Arc::new(SqliteDialect));

        registry
    }

    /// Register a dialect. Provider names are case-insensitive.
    pub fn register(&mut self, provider: &str, dialect: Arc<dyn Dialect>) {
        self.dialects.insert(provider.to_ascii_lowercase(), dialect);
    }

    pub fn resolve(&self, provider: &str) -> Result<Arc<dyn Dialect>> {
        self.dialects
            .get(&provider.trim().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| SluiceError::UnsupportedProvider(provider.to_string()))
    }

    /// Registered provider identifiers, sorted.
    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.dialects.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_providers() {
        let registry = DialectRegistry::with_defaults();
        assert_eq!(registry.resolve("postgres").unwrap().name(), "postgres");
        assert_eq!(registry.resolve("PostgreSQL").unwrap().name(), "postgres");
        assert_eq!(registry.resolve("mysql").unwrap().name(), "mysql");
        assert_eq!(registry.resolve("sqlite").unwrap().name(), "sqlite");
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let registry = DialectRegistry::with_defaults();
        let err = registry.resolve("sqlserver").err().unwrap();
        assert!(matches!(err, SluiceError::UnsupportedProvider(ref p) if p == "sqlserver"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_register_custom_alias() {
        let mut registry = DialectRegistry::new();
        registry.register("Lite", Arc::new(SqliteDialect));
        assert!(registry.resolve("lite").is_ok());
        assert_eq!(registry.providers(), vec!["lite"]);
    }

    #[test]
    fn test_lock_key_is_stable() {
        let a = LockKey::new("sluice:zeta.VersionInfo".into(), "t".into(), "a".into());
        let b = LockKey::new("sluice:zeta.VersionInfo".into(), "t".into(), "b".into());
        let c = LockKey::new("sluice:.VersionInfo".into(), "t".into(), "a".into());

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.short_name().len(), "sluice_".len() + 16);
    }

    #[test]
    fn test_fnv1a_reference_value() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
    }
}
