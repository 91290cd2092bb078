//! Fluent construction of schema operation sequences.
//!
//! ```
//! use sluice_core::schema::{ColumnType, SchemaBuilder};
//!
//! let mut schema = SchemaBuilder::new();
//! schema.in_schema(Some("zeta")).create_table("Person", |t| {
//!     t.column("Uid", ColumnType::Guid).primary_key();
//!     t.column("Name", ColumnType::string());
//! });
//! assert_eq!(schema.operations().len(), 1);
//! ```

use super::column::ColumnDef;
use super::operation::{IndexDef, SchemaOperation, TableDef, TableName};
use super::types::ColumnType;

/// Collects schema operations in the order they are declared.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    schema: Option<String>,
    operations: Vec<SchemaOperation>,
}

impl SchemaBuilder {
    /// Create a new schema builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema applied to every table referenced after this call.
    pub fn in_schema(&mut self, schema: Option<&str>) -> &mut Self {
        self.schema = schema.map(str::to_string);
        self
    }

    fn table(&self, name: &str) -> TableName {
        TableName::new(self.schema.as_deref(), name)
    }

    pub fn create_schema(&mut self, name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::CreateSchema {
            name: name.to_string(),
        });
        self
    }

    pub fn drop_schema(&mut self, name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropSchema {
            name: name.to_string(),
        });
        self
    }

    /// Create a new table.
    pub fn create_table<F>(&mut self, name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table = TableBuilder::default();
        callback(&mut table);

        self.operations.push(SchemaOperation::CreateTable(TableDef {
            table: self.table(name),
            columns: table.columns,
        }));
        self
    }

    pub fn drop_table(&mut self, name: &str) -> &mut Self {
        let table = self.table(name);
        self.operations.push(SchemaOperation::DropTable { table });
        self
    }

    /// Add a column to an existing table.
    pub fn add_column<F>(
        &mut self,
        table: &str,
        column: &str,
        column_type: ColumnType,
        callback: F,
    ) -> &mut Self
    where
        F: FnOnce(&mut ColumnDef),
    {
        let mut def = ColumnDef::new(column, column_type);
        callback(&mut def);

        let table = self.table(table);
        self.operations
            .push(SchemaOperation::AddColumn { table, column: def });
        self
    }

    pub fn drop_column(&mut self, table: &str, column: &str) -> &mut Self {
        let table = self.table(table);
        self.operations.push(SchemaOperation::DropColumn {
            table,
            column: column.to_string(),
        });
        self
    }

    /// Create an index. The name defaults to `IX_<table>_<columns>`.
    pub fn create_index(
        &mut self,
        table: &str,
        columns: &[&str],
        index_name: Option<&str>,
        unique: bool,
    ) -> &mut Self {
        let name = index_name
            .map(str::to_string)
            .unwrap_or_else(|| format!("IX_{}_{}", table, columns.join("_")));

        self.operations.push(SchemaOperation::CreateIndex(IndexDef {
            table: self.table(table),
            name,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        }));
        self
    }

    pub fn drop_index(&mut self, table: &str, index_name: &str) -> &mut Self {
        let table = self.table(table);
        self.operations.push(SchemaOperation::DropIndex {
            table,
            name: index_name.to_string(),
        });
        self
    }

    /// Execute raw SQL.
    pub fn sql(&mut self, sql: impl Into<String>) -> &mut Self {
        self.operations.push(SchemaOperation::Sql(sql.into()));
        self
    }

    pub fn operations(&self) -> &[SchemaOperation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn into_operations(self) -> Vec<SchemaOperation> {
        self.operations
    }
}

/// Column collector for CREATE TABLE.
#[derive(Debug, Clone, Default)]
pub struct TableBuilder {
    columns: Vec<ColumnDef>,
}

impl TableBuilder {
    /// Add a column and return it for further modifiers.
    pub fn column(&mut self, name: &str, column_type: ColumnType) -> &mut ColumnDef {
        self.columns.push(ColumnDef::new(name, column_type));
        let last = self.columns.len() - 1;
        &mut self.columns[last]
    }
}
