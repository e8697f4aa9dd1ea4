//! Row migration for a single table.
//!
//! Reads every source row, transforms rows in parallel, then writes them one by
//! one through the destination's upsert inside a per-table savepoint. Row-level
//! failures are recorded and skipped; only schema preconditions and store
//! failures abort the table.

use crate::core::error::TodoportError;
use crate::core::plan::{ColumnSpec, TableSpec, Transform};
use crate::core::store::{self, Row, Store};
use crate::plugins::inspect::SchemaInspector;
use crate::plugins::mapping::ValueMapper;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Everything a table migration needs. Handles are borrowed, never global.
pub struct MigrationContext<'a> {
    pub source: &'a dyn Store,
    pub destination: &'a dyn Store,
    pub inspector: &'a SchemaInspector<'a>,
    pub mapper: &'a ValueMapper,
    /// Qualifies generated source queries, e.g. `legacy` for an attached database.
    pub source_namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    Mapping,
    ForeignKey,
    Constraint,
    MissingValue,
}

impl RowErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RowErrorKind::Mapping => "mapping",
            RowErrorKind::ForeignKey => "foreign_key",
            RowErrorKind::Constraint => "constraint",
            RowErrorKind::MissingValue => "missing_value",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowError {
    /// Conflict-key values of the offending row, e.g. `project_id=p1, user_id=u1`.
    pub key: String,
    pub kind: RowErrorKind,
    pub cause: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableOutcome {
    pub read: usize,
    /// Rows inserted or updated. Rows already identical in the destination are not counted.
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub omitted_columns: Vec<String>,
    pub errors: Vec<RowError>,
    /// Enum values that only mapped through a domain fallback, keyed
    /// `column: legacy -> target`, with the number of rows affected.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fallbacks: BTreeMap<String, usize>,
}

/// A transformed row plus the enum fallbacks it needed.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRow {
    pub row: Row,
    pub fallbacks: Vec<String>,
}

impl TableOutcome {
    fn skip(&mut self, error: RowError) {
        self.skipped += 1;
        self.errors.push(error);
    }
}

pub fn migrate_table(
    ctx: &MigrationContext<'_>,
    spec: &TableSpec,
) -> Result<TableOutcome, TodoportError> {
    let destination = spec.destination_table();
    let present = ctx.inspector.columns_of(destination)?;
    if present.is_empty() {
        return Err(TodoportError::SchemaPreconditionError(format!(
            "destination table '{}' does not exist",
            destination
        )));
    }

    let mut outcome = TableOutcome::default();
    let mut active: Vec<&ColumnSpec> = Vec::with_capacity(spec.columns.len());
    for col in &spec.columns {
        if present.contains(&col.name) {
            active.push(col);
        } else if col.optional {
            outcome.omitted_columns.push(col.name.clone());
        } else {
            return Err(TodoportError::SchemaPreconditionError(format!(
                "destination table '{}' is missing required column '{}'",
                destination, col.name
            )));
        }
    }

    let source_rows = ctx
        .source
        .query(&spec.source_sql(ctx.source_namespace.as_deref()))?;
    outcome.read = source_rows.len();

    // Source columns are uniform across rows, so check them once on the first row.
    if let Some(first) = source_rows.first() {
        let mut missing = Vec::new();
        active.retain(|col| {
            if !col.transform.requires_source() || first.contains_key(col.source_column()) {
                return true;
            }
            if col.optional {
                outcome.omitted_columns.push(col.name.clone());
            } else {
                missing.push(col.source_column().to_string());
            }
            false
        });
        if !missing.is_empty() {
            return Err(TodoportError::SchemaPreconditionError(format!(
                "source for '{}' lacks column(s): {}",
                spec.name,
                missing.join(", ")
            )));
        }
    }

    let mapper = ctx.mapper;
    let transformed: Vec<Result<MappedRow, RowError>> = source_rows
        .par_iter()
        .map(|row| transform_row(mapper, spec, &active, row))
        .collect();

    ctx.destination.savepoint(&spec.name)?;
    match write_rows(ctx, spec, transformed, &mut outcome) {
        Ok(()) => {
            ctx.destination.release(&spec.name)?;
            Ok(outcome)
        }
        Err(err) => match ctx.destination.rollback_to(&spec.name) {
            Ok(()) => Err(err),
            Err(rollback) => Err(TodoportError::RollbackFailed {
                table: spec.name.clone(),
                cause: err.to_string(),
                rollback: rollback.to_string(),
            }),
        },
    }
}

fn write_rows(
    ctx: &MigrationContext<'_>,
    spec: &TableSpec,
    transformed: Vec<Result<MappedRow, RowError>>,
    outcome: &mut TableOutcome,
) -> Result<(), TodoportError> {
    let destination = spec.destination_table();
    for result in transformed {
        let MappedRow { row, fallbacks } = match result {
            Ok(mapped) => mapped,
            Err(row_error) => {
                outcome.skip(row_error);
                continue;
            }
        };

        if let Some(violation) = check_references(ctx, spec, &row)? {
            outcome.skip(violation);
            continue;
        }

        match ctx.destination.upsert(destination, &row, &spec.conflict_keys) {
            Ok(done) => {
                if done.is_write() {
                    outcome.written += 1;
                } else {
                    outcome.unchanged += 1;
                }
                for hit in fallbacks {
                    *outcome.fallbacks.entry(hit).or_insert(0) += 1;
                }
            }
            Err(err) if store::is_row_level(&err) => {
                let kind = match err {
                    TodoportError::ForeignKeyViolation(_) => RowErrorKind::ForeignKey,
                    _ => RowErrorKind::Constraint,
                };
                outcome.skip(RowError {
                    key: written_key(spec, &row),
                    kind,
                    cause: err.to_string(),
                });
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Finds the first declared reference whose parent row is absent from the destination.
fn check_references(
    ctx: &MigrationContext<'_>,
    spec: &TableSpec,
    row: &Row,
) -> Result<Option<RowError>, TodoportError> {
    for reference in &spec.references {
        let Some(value) = row.get(&reference.column) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if !ctx
            .inspector
            .has_column(&reference.table, &reference.parent_column)?
        {
            return Ok(Some(RowError {
                key: written_key(spec, row),
                kind: RowErrorKind::ForeignKey,
                cause: format!(
                    "parent table '{}' (column '{}') does not exist in the destination",
                    reference.table, reference.parent_column
                ),
            }));
        }
        let found = ctx.destination.row_exists(
            &reference.table,
            &[(reference.parent_column.clone(), value.clone())],
        )?;
        if !found {
            let err = TodoportError::ForeignKeyViolation(format!(
                "{}={} has no parent in {}.{}",
                reference.column,
                display_value(value),
                reference.table,
                reference.parent_column
            ));
            return Ok(Some(RowError {
                key: written_key(spec, row),
                kind: RowErrorKind::ForeignKey,
                cause: err.to_string(),
            }));
        }
    }
    Ok(None)
}

/// Projects one source row through the active column transforms.
pub fn transform_row(
    mapper: &ValueMapper,
    spec: &TableSpec,
    active: &[&ColumnSpec],
    source: &Row,
) -> Result<MappedRow, RowError> {
    let mut out = Row::new();
    let mut fallbacks = Vec::new();
    for col in active {
        let raw = source.get(col.source_column());
        let value = match &col.transform {
            Transform::Identity => raw.cloned().unwrap_or(JsonValue::Null),
            Transform::Constant { value } => value.clone(),
            Transform::Default { value } => match raw {
                Some(v) if !v.is_null() => v.clone(),
                _ => value.clone(),
            },
            Transform::Enum { domain } => match raw {
                None | Some(JsonValue::Null) => JsonValue::Null,
                Some(v) => {
                    let legacy = display_value(v);
                    let mapped = mapper
                        .resolve_enum(domain, &legacy)
                        .map_err(|err| RowError {
                            key: source_key(spec, source),
                            kind: RowErrorKind::Mapping,
                            cause: err.to_string(),
                        })?;
                    if mapped.via_fallback {
                        fallbacks.push(format!("{}: {} -> {}", col.name, legacy, mapped.value));
                    }
                    JsonValue::String(mapped.value)
                }
            },
        };
        out.insert(col.name.clone(), value);
    }

    for key in &spec.conflict_keys {
        if out.get(key).is_none_or(JsonValue::is_null) {
            return Err(RowError {
                key: source_key(spec, source),
                kind: RowErrorKind::MissingValue,
                cause: format!("conflict key '{}' is null", key),
            });
        }
    }
    Ok(MappedRow { row: out, fallbacks })
}

fn source_key(spec: &TableSpec, source: &Row) -> String {
    spec.conflict_keys
        .iter()
        .map(|k| {
            let column = spec.column(k).map(|c| c.source_column()).unwrap_or(k);
            let value = source
                .get(column)
                .map(display_value)
                .unwrap_or_else(|| "?".to_string());
            format!("{}={}", k, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn written_key(spec: &TableSpec, row: &Row) -> String {
    spec.conflict_keys
        .iter()
        .map(|k| {
            let value = row
                .get(k)
                .map(display_value)
                .unwrap_or_else(|| "?".to_string());
            format!("{}={}", k, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "migrate",
        "version": "0.1.0",
        "description": "Per-table row migration with idempotent upsert",
        "commands": [
            { "name": "migrate", "parameters": ["source", "dest", "config", "dry_run"] }
        ],
        "storage": ["<destination database>"]
    })
}
