mod catalog;
mod source;
mod unit;

pub use catalog::Catalog;
pub use source::{CodeSource, MigrationSource, UnitFactory};
pub use unit::{Migration, MigrationUnit};
