use std::fmt;

use serde::{Deserialize, Serialize};

use super::column::ColumnDef;

/// A possibly schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.map(str::to_string),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// CREATE TABLE payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub table: TableName,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    /// Columns that make up the primary key, in declaration order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// CREATE INDEX payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub table: TableName,
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// One abstract schema change.
///
/// Dialects turn each operation into one or more statements. Operations of a
/// migration run in listed order inside a single transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaOperation {
    CreateSchema { name: String },
    DropSchema { name: String },
    CreateTable(TableDef),
    DropTable { table: TableName },
    AddColumn { table: TableName, column: ColumnDef },
    DropColumn { table: TableName, column: String },
    CreateIndex(IndexDef),
    DropIndex { table: TableName, name: String },
    /// Raw SQL, executed as-is.
    Sql(String),
}

impl SchemaOperation {
    /// The operation undoing this one, if it can be derived.
    pub fn reverse(&self) -> Option<SchemaOperation> {
        match self {
            SchemaOperation::CreateSchema { name } => {
                Some(SchemaOperation::DropSchema { name: name.clone() })
            }
            SchemaOperation::CreateTable(def) => Some(SchemaOperation::DropTable {
                table: def.table.clone(),
            }),
            SchemaOperation::AddColumn { table, column } => Some(SchemaOperation::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            }),
            SchemaOperation::CreateIndex(index) => Some(SchemaOperation::DropIndex {
                table: index.table.clone(),
                name: index.name.clone(),
            }),
            SchemaOperation::DropSchema { .. }
            | SchemaOperation::DropTable { .. }
            | SchemaOperation::DropColumn { .. }
            | SchemaOperation::DropIndex { .. }
            | SchemaOperation::Sql(_) => None,
        }
    }

    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaOperation::CreateSchema { .. } => "create schema",
            SchemaOperation::DropSchema { .. } => "drop schema",
            SchemaOperation::CreateTable(_) => "create table",
            SchemaOperation::DropTable { .. } => "drop table",
            SchemaOperation::AddColumn { .. } => "add column",
            SchemaOperation::DropColumn { .. } => "drop column",
            SchemaOperation::CreateIndex(_) => "create index",
            SchemaOperation::DropIndex { .. } => "drop index",
            SchemaOperation::Sql(_) => "sql",
        }
    }
}

/// Reverse a whole operation sequence, last operation first.
///
/// Returns `None` as soon as one operation is irreversible.
pub fn reverse_operations(operations: &[SchemaOperation]) -> Option<Vec<SchemaOperation>> {
    operations.iter().rev().map(SchemaOperation::reverse).collect()
}
