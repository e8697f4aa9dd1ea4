//! Store abstraction for the migration's source and destination.
//!
//! The migrator, inspector and orchestrator only see the [`Store`] trait: a
//! catalog lookup, a read query, a keyed upsert and savepoints. [`SqliteStore`]
//! is the shipped implementation. Handles are always passed explicitly; there is
//! no process-wide connection.

use crate::core::db;
use crate::core::error::TodoportError;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::Path;

/// SQLite extended result code for a failed FOREIGN KEY constraint.
const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;

/// Schema that unqualified table names resolve to. Attached databases are never
/// searched for them.
pub const DEFAULT_SCHEMA: &str = "main";

/// A row as a column-name to value map. Ordered so generated SQL is deterministic.
pub type Row = BTreeMap<String, JsonValue>;

/// One column as reported by the store catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    /// 1-based position in the primary key, 0 when not part of it.
    pub primary_key: u32,
}

/// What an upsert did to the destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    pub fn is_write(self) -> bool {
        !matches!(self, UpsertOutcome::Unchanged)
    }
}

pub trait Store {
    /// Columns of `table`, in declaration order. Empty when the table does not exist.
    fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, TodoportError>;

    /// Runs a read-only query and returns every row.
    fn query(&self, sql: &str) -> Result<Vec<Row>, TodoportError>;

    /// Insert-or-update keyed on `conflict_keys`. Identical rows are left untouched.
    fn upsert(
        &self,
        table: &str,
        row: &Row,
        conflict_keys: &[String],
    ) -> Result<UpsertOutcome, TodoportError>;

    /// True when a row matching every `(column, value)` pair exists.
    fn row_exists(&self, table: &str, key: &[(String, JsonValue)]) -> Result<bool, TodoportError>;

    fn savepoint(&self, name: &str) -> Result<(), TodoportError>;

    fn release(&self, name: &str) -> Result<(), TodoportError>;

    fn rollback_to(&self, name: &str) -> Result<(), TodoportError>;
}

/// `Store` backed by a single SQLite connection. Other databases can be attached
/// as namespaces so one handle serves both sides of a migration.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, TodoportError> {
        Ok(Self {
            conn: db::db_open_existing(path)?,
        })
    }

    /// Opens or creates the database at `path`.
    pub fn create(path: &Path) -> Result<Self, TodoportError> {
        Ok(Self {
            conn: db::db_connect(&path.to_string_lossy())?,
        })
    }

    pub fn in_memory() -> Result<Self, TodoportError> {
        Ok(Self {
            conn: db::db_connect(":memory:")?,
        })
    }

    /// Attaches another database file under `alias`, making its tables reachable as `alias.table`.
    pub fn attach(&self, path: &Path, alias: &str) -> Result<(), TodoportError> {
        self.conn.execute(
            "ATTACH DATABASE ?1 AS ?2",
            params![path.to_string_lossy(), alias],
        )?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for SqliteStore {
    fn list_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, TodoportError> {
        let (schema, bare) = db::split_qualified(table);
        let schema = schema.unwrap_or(DEFAULT_SCHEMA);
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<ColumnInfo> {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? as u32,
            })
        };

        let mut stmt = self.conn.prepare(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1, ?2) ORDER BY cid",
        )?;
        let columns = stmt
            .query_map(params![bare, schema], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>, TodoportError> {
        let mut stmt = self.conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map([], |row| {
            let mut out = Row::new();
            for (idx, name) in names.iter().enumerate() {
                out.insert(name.clone(), value_ref_to_json(row.get_ref(idx)?));
            }
            Ok(out)
        })?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(TodoportError::RusqliteError)
    }

    fn upsert(
        &self,
        table: &str,
        row: &Row,
        conflict_keys: &[String],
    ) -> Result<UpsertOutcome, TodoportError> {
        if row.is_empty() {
            return Err(TodoportError::ValidationError(format!(
                "refusing to upsert an empty row into {}",
                table
            )));
        }
        let mut key = Vec::with_capacity(conflict_keys.len());
        for k in conflict_keys {
            let value = row.get(k).ok_or_else(|| {
                TodoportError::ValidationError(format!(
                    "conflict key '{}' missing from row for {}",
                    k, table
                ))
            })?;
            key.push((k.clone(), value.clone()));
        }
        let existed = self.row_exists(table, &key)?;

        let columns: Vec<&String> = row.keys().collect();
        let mutable: Vec<&String> = columns
            .iter()
            .copied()
            .filter(|c| !conflict_keys.contains(c))
            .collect();

        let column_list = columns
            .iter()
            .map(|c| db::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let conflict_list = conflict_keys
            .iter()
            .map(|c| db::quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let action = if mutable.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let sets = mutable
                .iter()
                .map(|c| format!("{0} = excluded.{0}", db::quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            let differs = mutable
                .iter()
                .map(|c| format!("{0} IS NOT excluded.{0}", db::quote_ident(c)))
                .collect::<Vec<_>>()
                .join(" OR ");
            format!("DO UPDATE SET {} WHERE {}", sets, differs)
        };
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            db::quote_ident(&qualify(table)),
            column_list,
            placeholders,
            conflict_list,
            action
        );

        let values: Vec<SqlValue> = row.values().map(json_to_sql).collect();
        let changed = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(values.iter()))
            .map_err(classify_write_error)?;

        Ok(match (changed, existed) {
            (0, _) => UpsertOutcome::Unchanged,
            (_, true) => UpsertOutcome::Updated,
            (_, false) => UpsertOutcome::Inserted,
        })
    }

    fn row_exists(&self, table: &str, key: &[(String, JsonValue)]) -> Result<bool, TodoportError> {
        if key.is_empty() {
            return Err(TodoportError::ValidationError(format!(
                "row lookup on {} needs at least one key column",
                table
            )));
        }
        let predicate = key
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{} = ?{}", db::quote_ident(col), i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} LIMIT 1",
            db::quote_ident(&qualify(table)),
            predicate
        );
        let values: Vec<SqlValue> = key.iter().map(|(_, v)| json_to_sql(v)).collect();
        let found: Option<i64> = self
            .conn
            .query_row(&sql, rusqlite::params_from_iter(values.iter()), |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    fn savepoint(&self, name: &str) -> Result<(), TodoportError> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {}", savepoint_name(name)))?;
        Ok(())
    }

    fn release(&self, name: &str) -> Result<(), TodoportError> {
        self.conn
            .execute_batch(&format!("RELEASE SAVEPOINT {}", savepoint_name(name)))?;
        Ok(())
    }

    fn rollback_to(&self, name: &str) -> Result<(), TodoportError> {
        let name = savepoint_name(name);
        // ROLLBACK TO leaves the savepoint open; release it so the transaction ends.
        self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
            name
        ))?;
        Ok(())
    }
}

/// True for store errors that concern a single row (constraint failures) rather
/// than the table or the connection.
pub fn is_row_level(err: &TodoportError) -> bool {
    match err {
        TodoportError::ForeignKeyViolation(_) => true,
        TodoportError::RusqliteError(rusqlite::Error::SqliteFailure(code, _)) => {
            code.code == ErrorCode::ConstraintViolation
        }
        _ => false,
    }
}

fn classify_write_error(err: rusqlite::Error) -> TodoportError {
    if let rusqlite::Error::SqliteFailure(code, msg) = &err {
        if code.extended_code == SQLITE_CONSTRAINT_FOREIGNKEY {
            return TodoportError::ForeignKeyViolation(
                msg.clone()
                    .unwrap_or_else(|| "FOREIGN KEY constraint failed".to_string()),
            );
        }
    }
    TodoportError::RusqliteError(err)
}

/// Pins an unqualified table name to [`DEFAULT_SCHEMA`].
fn qualify(table: &str) -> String {
    match db::split_qualified(table) {
        (Some(_), _) => table.to_string(),
        (None, bare) => format!("{}.{}", DEFAULT_SCHEMA, bare),
    }
}

fn savepoint_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("sp_{}", cleaned)
}

pub fn json_to_sql(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

pub fn value_ref_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(b.iter().map(|x| format!("{:02x}", x)).collect()),
    }
}
