use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TodoportError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("no mapping for {value:?} in domain '{domain}'")]
    MappingError { domain: String, value: String },
    #[error("Unknown enum domain: {0}")]
    UnknownDomain(String),
    #[error("Schema precondition failed: {0}")]
    SchemaPreconditionError(String),
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("table '{table}' failed ({cause}) and rolling it back also failed: {rollback}")]
    RollbackFailed {
        table: String,
        cause: String,
        rollback: String,
    },
}

impl TodoportError {
    /// Stable short label used in reports and the journal.
    pub fn kind(&self) -> &'static str {
        match self {
            TodoportError::RusqliteError(_) => "sqlite",
            TodoportError::IoError(_) => "io",
            TodoportError::JsonError(_) => "json",
            TodoportError::ConfigError(_) => "config",
            TodoportError::MappingError { .. } => "mapping",
            TodoportError::UnknownDomain(_) => "unknown_domain",
            TodoportError::SchemaPreconditionError(_) => "schema_precondition",
            TodoportError::ForeignKeyViolation(_) => "foreign_key",
            TodoportError::ValidationError(_) => "validation",
            TodoportError::NotFound(_) => "not_found",
            TodoportError::RollbackFailed { .. } => "rollback",
        }
    }
}
