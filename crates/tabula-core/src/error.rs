use thiserror::Error;

/// Errors reported by the storage core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A table or field name fails the syntactic rule (letter followed by
    /// letters, digits or underscore).
    #[error("invalid name '{0}'")]
    InvalidName(String),

    /// The requested table does not exist.
    #[error("table '{0}' does not exist")]
    TableNotFound(String),

    /// The requested field does not exist in the table.
    #[error("field '{field}' does not exist in table '{table}'")]
    FieldNotFound { table: String, field: String },

    /// The requested item does not exist in the table.
    #[error("no {table} item {item}")]
    ItemNotFound { table: String, item: i64 },

    /// The item id is outside the valid range (0 is reserved).
    #[error("invalid item id {0}")]
    InvalidItem(i64),

    /// A scalar field is NULL, or a list field has no rows for the item.
    #[error("no value for {table} {item} {field}")]
    NoValue {
        table: String,
        item: i64,
        field: String,
    },

    /// A value's kind does not match the field's base kind, or the arity is
    /// wrong (several values into a scalar field, empty input).
    #[error("kind mismatch: {0}")]
    KindMismatch(String),

    /// The table declaration is invalid (no fields, duplicate names, table
    /// already declared).
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Stored data cannot be decoded (unknown kind discriminant, malformed
    /// datetime text).
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Begin, commit or rollback failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// An error originating from the underlying SQLite database.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
