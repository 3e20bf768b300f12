use thiserror::Error;

/// Failures that abort a schema build before any data is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unresolved $ref '{0}'")]
    UnresolvedRef(String),
    #[error("unsupported $ref '{0}': only document-local references (#/...) are resolved")]
    UnsupportedRef(String),
    #[error("table identifier '{name}' for path {path:?} collides with an existing table")]
    IdentifierCollision { name: String, path: Vec<String> },
    #[error("no free column name for '{column}' in table '{table}'")]
    ColumnCollision { table: String, column: String },
    #[error("invalid root '{root}': {reason}")]
    InvalidRoot { root: String, reason: String },
}

pub type SchemaResult<T> = Result<T, SchemaError>;
