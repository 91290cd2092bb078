use sqlx::postgres::{PgConnection, Postgres};
use sqlx::Connection;

use sluice_core::config::LockConfig;
use sluice_core::error::{Result, SluiceError};
use sluice_core::schema::{ColumnType, TableName};

use super::{BoxFuture, Dialect, LockKey, SchemaSession};

/// PostgreSQL dialect. Locks with session-level advisory locks.
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn supports_schemas(&self) -> bool {
        true
    }

    fn quote(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn column_type(&self, column_type: &ColumnType) -> String {
        match column_type {
            ColumnType::Guid => "UUID".to_string(),
            ColumnType::String(len) => format!("VARCHAR({})", ColumnType::string_length(*len)),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Int32 => "INTEGER".to_string(),
            ColumnType::Int64 => "BIGINT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::DateTime => "TIMESTAMPTZ".to_string(),
            ColumnType::Decimal(p, s) => format!("NUMERIC({}, {})", p, s),
            ColumnType::Double => "DOUBLE PRECISION".to_string(),
            ColumnType::Binary => "BYTEA".to_string(),
        }
    }

    fn timestamp_type(&self) -> &'static str {
        "TIMESTAMPTZ"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn drop_index(&self, table: &TableName, name: &str) -> String {
        // Postgres indexes live in their table's schema.
        format!("DROP INDEX {}", self.qualify(table.schema.as_deref(), name))
    }

    fn connect<'a>(
        &'a self,
        connection_string: &'a str,
        _lock: &'a LockConfig,
    ) -> BoxFuture<'a, Result<Box<dyn SchemaSession>>> {
        Box::pin(async move {
            let conn = PgConnection::connect(connection_string)
                .await
                .map_err(|e| SluiceError::Database(format!("Failed to connect: {}", e)))?;
            Ok(Box::new(PgSession { conn }) as Box<dyn SchemaSession>)
        })
    }
}

struct PgSession {
    conn: PgConnection,
}

impl SchemaSession for PgSession {
    sqlx_session_queries!(Postgres);

    fn try_lock<'a>(&'a mut self, key: &'a LockKey) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
                .bind(key.id)
                .fetch_one(&mut self.conn)
                .await
                .map_err(|e| {
                    SluiceError::Database(format!("Failed to acquire migration lock: {}", e))
                })?;
            Ok(acquired)
        })
    }

    fn unlock<'a>(&'a mut self, key: &'a LockKey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                .bind(key.id)
                .fetch_one(&mut self.conn)
                .await
                .map_err(|e| {
                    SluiceError::Database(format!("Failed to release migration lock: {}", e))
                })?;
            if !released {
                return Err(SluiceError::Database(format!(
                    "Migration lock '{}' was not held by this session",
                    key.name
                )));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::schema::{SchemaBuilder, SchemaOperation};

    fn render_all(schema: &SchemaBuilder) -> Vec<String> {
        schema
            .operations()
            .iter()
            .flat_map(|op| PostgresDialect.render(op).unwrap())
            .collect()
    }

    #[test]
    fn test_create_table_in_schema() {
        let mut schema = SchemaBuilder::new();
        schema.in_schema(Some("zeta")).create_table("Person", |t| {
            t.column("Uid", ColumnType::Guid).primary_key();
            t.column("Name", ColumnType::string());
        });

        let sql = render_all(&schema).remove(0);
        assert!(sql.starts_with("CREATE TABLE \"zeta\".\"Person\""));
        assert!(sql.contains("\"Uid\" UUID NOT NULL"));
        assert!(sql.contains("\"Name\" VARCHAR(255) NOT NULL"));
        assert!(sql.contains("CONSTRAINT \"PK_Person\" PRIMARY KEY (\"Uid\")"));
    }

    #[test]
    fn test_schema_and_index_statements() {
        let mut schema = SchemaBuilder::new();
        schema
            .create_schema("zeta")
            .in_schema(Some("zeta"))
            .create_index("Person", &["Name"], None, true)
            .drop_index("Person", "IX_Person_Name");

        let sql = render_all(&schema);
        assert_eq!(sql[0], "CREATE SCHEMA IF NOT EXISTS \"zeta\"");
        assert_eq!(
            sql[1],
            "CREATE UNIQUE INDEX \"IX_Person_Name\" ON \"zeta\".\"Person\" (\"Name\")"
        );
        assert_eq!(sql[2], "DROP INDEX \"zeta\".\"IX_Person_Name\"");
    }

    #[test]
    fn test_quote_escapes_embedded_quotes() {
        assert_eq!(PostgresDialect.quote("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_raw_sql_passes_through() {
        let op = SchemaOperation::Sql("SELECT 1".into());
        assert_eq!(PostgresDialect.render(&op).unwrap(), vec!["SELECT 1"]);
    }

    #[test]
    fn test_placeholders_are_numbered() {
        assert_eq!(PostgresDialect.placeholder(2), "$2");
    }
}
