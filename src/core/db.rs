use crate::core::error;
use rusqlite::Connection;
use std::path::Path;

/// Busy timeout applied to every connection the tool opens.
const BUSY_TIMEOUT_SECS: u64 = 5;

pub fn db_connect(db_path: &str) -> Result<Connection, error::TodoportError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(BUSY_TIMEOUT_SECS))
        .map_err(error::TodoportError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::TodoportError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::TodoportError::RusqliteError)?;
    Ok(conn)
}

/// Opens an existing database file. Unlike `db_connect`, a missing file is an error
/// instead of silently creating an empty database.
pub fn db_open_existing(db_path: &Path) -> Result<Connection, error::TodoportError> {
    if !db_path.exists() {
        return Err(error::TodoportError::NotFound(format!(
            "database file {}",
            db_path.display()
        )));
    }
    db_connect(&db_path.to_string_lossy())
}

/// Quotes an identifier for SQLite. `schema.table` is quoted per segment.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Splits `schema.table` into its optional schema and bare table name.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((schema, table)) => (Some(schema), table),
        None => (None, name),
    }
}
