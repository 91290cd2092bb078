mod builder;
mod column;
mod operation;
mod types;

pub use builder::{SchemaBuilder, TableBuilder};
pub use column::ColumnDef;
pub use operation::{reverse_operations, IndexDef, SchemaOperation, TableDef, TableName};
pub use types::ColumnType;
