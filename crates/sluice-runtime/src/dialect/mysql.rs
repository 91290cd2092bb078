use sqlx::mysql::{MySql, MySqlConnection};
use sqlx::Connection;

use sluice_core::config::LockConfig;
use sluice_core::error::{Result, SluiceError};
use sluice_core::schema::{ColumnType, TableName};

use super::{BoxFuture, Dialect, LockKey, SchemaSession};

/// MySQL dialect. Locks with `GET_LOCK` named locks.
///
/// MySQL commits DDL implicitly, so a failing migration can leave the
/// statements before the failing one applied. The ledger row is still only
/// written when every statement succeeded.
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn supports_schemas(&self) -> bool {
        false
    }

    fn quote(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn column_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Guid => "CHAR(36)".to_string(),
            ColumnType::String(len) => format!("VARCHAR({})", ColumnType::string_length(*len)),
            ColumnType::Text => "LONGTEXT".to_string(),
            ColumnType::Int32 => "INT".to_string(),
            ColumnType::Int64 => "BIGINT".to_string(),
            ColumnType::Boolean => "TINYINT(1)".to_string(),
            ColumnType::DateTime => "DATETIME(6)".to_string(),
            ColumnType::Decimal(p, s) => format!("DECIMAL({}, {})", p, s),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Binary => "LONGBLOB".to_string(),
        }
    }

    fn timestamp_type(&self) -> &'static str {
        "DATETIME(6)"
    }

    fn drop_index(&self, table: &TableName, name: &str) -> String {
        format!("DROP INDEX {} ON {}", self.quote(name), self.table(table))
    }

    fn connect<'a>(
        &'a self,
        connection_string: &'a str,
        _lock: &'a LockConfig,
    ) -> BoxFuture<'a, Result<Box<dyn SchemaSession>>> {
        Box::pin(async move {
            let conn = MySqlConnection::connect(connection_string)
                .await
                .map_err(|e| SluiceError::Database(format!("Failed to connect: {}", e)))?;
            Ok(Box::new(MySqlSession { conn }) as Box<dyn SchemaSession>)
        })
    }
}

struct MySqlSession {
    conn: MySqlConnection,
}

impl SchemaSession for MySqlSession {
    sqlx_session_queries!(MySql);

    fn try_lock<'a>(&'a mut self, key: &'a LockKey) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            // NULL means an error occurred inside GET_LOCK.
            let acquired = sqlx::query_scalar::<_, Option<i64>>("SELECT GET_LOCK(?, 0)")
                .bind(key.short_name())
                .fetch_one(&mut self.conn)
                .await
                .map_err(|e| {
                    SluiceError::Database(format!("Failed to acquire migration lock: {}", e))
                })?;
            Ok(acquired == Some(1))
        })
    }

    fn unlock<'a>(&'a mut self, key: &'a LockKey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let released = sqlx::query_scalar::<_, Option<i64>>("SELECT RELEASE_LOCK(?)")
                .bind(key.short_name())
                .fetch_one(&mut self.conn)
                .await
                .map_err(|e| {
                    SluiceError::Database(format!("Failed to release migration lock: {}", e))
                })?;
            if released != Some(1) {
                return Err(SluiceError::Database(format!(
                    "Migration lock '{}' was not held by this session",
                    key.name
                )));
            }
            Ok(())
        })
    }
}
