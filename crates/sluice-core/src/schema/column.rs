use serde::{Deserialize, Serialize};

use super::types::ColumnType;

/// Definition of a table column.
///
/// Columns are `NOT NULL` unless marked [`nullable`](ColumnDef::nullable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,

    /// Column type.
    pub column_type: ColumnType,

    /// Whether the column accepts NULL.
    pub nullable: bool,

    /// Part of the table's primary key.
    pub primary_key: bool,

    /// Carries a single-column unique constraint.
    pub unique: bool,

    /// Default value expression, emitted verbatim.
    pub default: Option<String>,
}

impl ColumnDef {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            primary_key: false,
            unique: false,
            default: None,
        }
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(&mut self) -> &mut Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(&mut self) -> &mut Self {
        self.unique = true;
        self
    }

    pub fn default_value(&mut self, expression: impl Into<String>) -> &mut Self {
        self.default = Some(expression.into());
        self
    }
}
