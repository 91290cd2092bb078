use serde::{Deserialize, Serialize};

/// Dialect-neutral column types.
///
/// Each dialect maps these onto its own type names when rendering DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// 128-bit globally unique identifier
    Guid,
    /// Variable-length string with optional max length
    String(Option<u32>),
    /// Unlimited text
    Text,
    /// 32-bit integer
    Int32,
    /// 64-bit integer
    Int64,
    /// Boolean
    Boolean,
    /// Point in time
    DateTime,
    /// Decimal with precision and scale
    Decimal(u8, u8),
    /// 64-bit floating point
    Double,
    /// Byte array
    Binary,
}

impl ColumnType {
    /// Unbounded-default string, rendered with the dialect's default length.
    pub fn string() -> Self {
        ColumnType::String(None)
    }

    /// Default length used when a string column declares none.
    pub const DEFAULT_STRING_LENGTH: u32 = 255;

    /// Length of a string column, falling back to the default.
    pub fn string_length(len: Option<u32>) -> u32 {
        len.unwrap_or(Self::DEFAULT_STRING_LENGTH)
    }
}
