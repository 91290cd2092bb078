use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection};
use sqlx::Connection;
use tracing::warn;

use sluice_core::config::LockConfig;
use sluice_core::error::{Result, SluiceError};
use sluice_core::schema::ColumnType;

use super::{BoxFuture, Dialect, LockKey, SchemaSession};

/// SQLite dialect.
///
/// SQLite has no session-scoped named locks, so the run-lock is a single row
/// in a dedicated lock table. Inserting the row takes the lock; a unique
/// violation means another runner holds it. A row older than the configured
/// stale age is treated as left behind by a dead runner and taken over.
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn supports_schemas(&self) -> bool {
        false
    }

    fn quote(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn column_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Guid => "TEXT".to_string(),
            ColumnType::String(len) => format!("VARCHAR({})", ColumnType::string_length(*len)),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Int32 | ColumnType::Int64 => "INTEGER".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Decimal(p, s) => format!("NUMERIC({}, {})", p, s),
            ColumnType::Double => "REAL".to_string(),
            ColumnType::Binary => "BLOB".to_string(),
        }
    }

    fn timestamp_type(&self) -> &'static str {
        "DATETIME"
    }

    fn connect<'a>(
        &'a self,
        connection_string: &'a str,
        lock: &'a LockConfig,
    ) -> BoxFuture<'a, Result<Box<dyn SchemaSession>>> {
        Box::pin(async move {
            // Writers queue on the file lock for as long as we would wait for the run-lock.
            let options = SqliteConnectOptions::from_str(connection_string)
                .map_err(|e| {
                    SluiceError::Config(format!("Invalid SQLite connection string: {}", e))
                })?
                .busy_timeout(lock.timeout());
            let conn = SqliteConnection::connect_with(&options)
                .await
                .map_err(|e| SluiceError::Database(format!("Failed to connect: {}", e)))?;
            Ok(Box::new(SqliteSession {
                conn,
                stale_after: lock.stale_after(),
                lock_table_ready: false,
            }) as Box<dyn SchemaSession>)
        })
    }
}

struct SqliteSession {
    conn: SqliteConnection,
    stale_after: Option<Duration>,
    lock_table_ready: bool,
}

/// SQLITE_BUSY and its extended codes: another connection holds the file lock.
fn is_busy(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(e) => e
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map_or(false, |code| code & 0xff == 5),
        _ => false,
    }
}

impl SqliteSession {
    async fn ensure_lock_table(&mut self, table: &str) -> sqlx::Result<()> {
        if self.lock_table_ready {
            return Ok(());
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \"Id\" INTEGER NOT NULL PRIMARY KEY,\n    \"Owner\" TEXT NOT NULL,\n    \"AcquiredOn\" DATETIME NOT NULL\n)",
            table
        );
        sqlx::query(&sql).execute(&mut self.conn).await?;

        self.lock_table_ready = true;
        Ok(())
    }

    async fn insert_lock_row(&mut self, key: &LockKey) -> sqlx::Result<bool> {
        self.ensure_lock_table(&key.table).await?;

        let sql = format!(
            "INSERT INTO {} (\"Id\", \"Owner\", \"AcquiredOn\") VALUES (1, ?, ?)",
            key.table
        );
        let result = sqlx::query(&sql)
            .bind(key.owner.as_str())
            .bind(Utc::now())
            .execute(&mut self.conn)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                self.take_over_stale(key).await
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the current holder when its row is older than the stale age.
    ///
    /// The update only matches the holder that was read, so two runners
    /// racing for the same abandoned row cannot both win.
    async fn take_over_stale(&mut self, key: &LockKey) -> sqlx::Result<bool> {
        let Some(stale_after) = self.stale_after else {
            return Ok(false);
        };

        let sql = format!(
            "SELECT \"Owner\", \"AcquiredOn\" FROM {} WHERE \"Id\" = 1",
            key.table
        );
        let holder: Option<(String, DateTime<Utc>)> =
            sqlx::query_as(&sql).fetch_optional(&mut self.conn).await?;

        // Released in the meantime; the next attempt inserts.
        let Some((holder, acquired_on)) = holder else {
            return Ok(false);
        };

        let age = (Utc::now() - acquired_on).to_std().unwrap_or_default();
        if age < stale_after {
            return Ok(false);
        }

        let sql = format!(
            "UPDATE {} SET \"Owner\" = ?, \"AcquiredOn\" = ? WHERE \"Id\" = 1 AND \"Owner\" = ?",
            key.table
        );
        let result = sqlx::query(&sql)
            .bind(key.owner.as_str())
            .bind(Utc::now())
            .bind(holder.as_str())
            .execute(&mut self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        warn!(
            "Took over stale migration lock '{}' from {} (held since {})",
            key.name, holder, acquired_on
        );
        Ok(true)
    }
}

impl SchemaSession for SqliteSession {
    sqlx_session_queries!(Sqlite);

    fn try_lock<'a>(&'a mut self, key: &'a LockKey) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            match self.insert_lock_row(key).await {
                Ok(acquired) => Ok(acquired),
                // A long migration of the holder keeps the file locked.
                Err(e) if is_busy(&e) => Ok(false),
                Err(e) => Err(SluiceError::Database(format!(
                    "Failed to acquire migration lock: {}",
                    e
                ))),
            }
        })
    }

    fn unlock<'a>(&'a mut self, key: &'a LockKey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let sql = format!(
                "DELETE FROM {} WHERE \"Id\" = 1 AND \"Owner\" = ?",
                key.table
            );
            let result = sqlx::query(&sql)
                .bind(key.owner.as_str())
                .execute(&mut self.conn)
                .await
                .map_err(|e| {
                    SluiceError::Database(format!("Failed to release migration lock: {}", e))
                })?;

            if result.rows_affected() == 0 {
                return Err(SluiceError::Database(format!(
                    "Migration lock '{}' was not held by this session",
                    key.name
                )));
            }
            Ok(())
        })
    }
}
