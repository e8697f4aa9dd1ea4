//! Declarative per-table migration plans.
//!
//! A plan is an ordered list of [`TableSpec`]s. Order is the caller's
//! dependency order (parents before children); the orchestrator never reorders.

use crate::core::db;
use crate::core::error::TodoportError;
use crate::plugins::mapping::ValueMapper;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};

const TODOAPP_PLAN: &str = include_str!("../assets/todoapp_plan.toml");

/// How a destination column's value is produced from the source row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
    #[default]
    Identity,
    /// Remap through an enum domain of the `ValueMapper`. Nulls stay null.
    Enum { domain: String },
    /// Source value, or `value` when the source is null or absent.
    Default { value: JsonValue },
    /// Always `value`; the source is not read.
    Constant { value: JsonValue },
}

impl Transform {
    pub fn requires_source(&self) -> bool {
        matches!(self, Transform::Identity | Transform::Enum { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnSpec {
    /// Destination column name.
    pub name: String,
    /// Source column name when it differs from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub transform: Transform,
    /// Omitted from writes when the destination (or source) lacks it.
    #[serde(default)]
    pub optional: bool,
}

impl ColumnSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            transform: Transform::Identity,
            optional: false,
        }
    }

    pub fn source_column(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }
}

/// A foreign key the migrator checks against the destination before writing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub column: String,
    /// Destination table holding the parent rows.
    pub table: String,
    #[serde(default = "default_parent_column")]
    pub parent_column: String,
}

fn default_parent_column() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSpec {
    pub name: String,
    /// Source table, defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Replaces the generated `SELECT *` when the source needs shaping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_query: Option<String>,
    /// Destination table, defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub conflict_keys: Vec<String>,
    pub columns: Vec<ColumnSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,
}

impl TableSpec {
    pub fn source_table(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }

    pub fn destination_table(&self) -> &str {
        self.destination.as_deref().unwrap_or(&self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The read statement for this table. `namespace` qualifies the generated
    /// query only; an explicit `source_query` is used verbatim.
    pub fn source_sql(&self, namespace: Option<&str>) -> String {
        if let Some(sql) = &self.source_query {
            return sql.clone();
        }
        let table = match namespace {
            Some(ns) if !self.source_table().contains('.') => {
                format!("{}.{}", ns, self.source_table())
            }
            _ => self.source_table().to_string(),
        };
        format!("SELECT * FROM {}", db::quote_ident(&table))
    }
}

#[derive(Debug, Deserialize)]
struct PlanFile {
    #[serde(default)]
    tables: Vec<TableSpec>,
}

/// The built-in TodoApp plan.
pub fn todoapp_plan() -> Result<Vec<TableSpec>, TodoportError> {
    let file: PlanFile = toml::from_str(TODOAPP_PLAN)
        .map_err(|e| TodoportError::ConfigError(format!("built-in plan: {}", e)))?;
    Ok(file.tables)
}

/// Checks every table spec once, up front. All problems are reported together.
pub fn validate_plan(specs: &[TableSpec], mapper: &ValueMapper) -> Result<(), TodoportError> {
    let mut problems = Vec::new();
    let mut names = BTreeSet::new();

    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            problems.push(format!("table '{}' declared twice", spec.name));
        }
        if spec.conflict_keys.is_empty() {
            problems.push(format!("{}: no conflict keys", spec.name));
        }

        let mut columns = BTreeSet::new();
        for col in &spec.columns {
            if !columns.insert(col.name.as_str()) {
                problems.push(format!("{}: column '{}' declared twice", spec.name, col.name));
            }
            if let Transform::Enum { domain } = &col.transform {
                if mapper.domain(domain).is_none() {
                    problems.push(format!(
                        "{}.{}: unknown enum domain '{}'",
                        spec.name, col.name, domain
                    ));
                }
            }
        }

        for key in &spec.conflict_keys {
            match spec.column(key) {
                None => problems.push(format!(
                    "{}: conflict key '{}' is not a declared column",
                    spec.name, key
                )),
                Some(col) if col.optional => problems.push(format!(
                    "{}: conflict key '{}' cannot be optional",
                    spec.name, key
                )),
                Some(_) => {}
            }
        }

        for reference in &spec.references {
            if spec.column(&reference.column).is_none() {
                problems.push(format!(
                    "{}: reference column '{}' is not a declared column",
                    spec.name, reference.column
                ));
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(TodoportError::ValidationError(format!(
            "invalid migration plan: {}",
            problems.join("; ")
        )))
    }
}

/// Warnings for references whose parent table runs later in the plan or is not
/// in the plan at all. The plan still runs as given.
pub fn check_order(specs: &[TableSpec]) -> Vec<String> {
    let position: HashMap<&str, usize> = specs
        .iter()
        .enumerate()
        .map(|(i, s)| (s.destination_table(), i))
        .collect();

    let mut warnings = Vec::new();
    for (idx, spec) in specs.iter().enumerate() {
        for reference in &spec.references {
            if reference.table == spec.destination_table() {
                continue;
            }
            match position.get(reference.table.as_str()) {
                Some(&parent) if parent > idx => warnings.push(format!(
                    "{} references {} which runs later (position {} > {})",
                    spec.name, reference.table, parent, idx
                )),
                None => warnings.push(format!(
                    "{} references {} which is not part of this plan",
                    spec.name, reference.table
                )),
                _ => {}
            }
        }
    }
    warnings
}

/// SHA-256 over the canonical JSON form of the plan.
pub fn plan_digest(specs: &[TableSpec]) -> Result<String, TodoportError> {
    let canonical = serde_json::to_string(specs)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
