//! Destination schema introspection.

use crate::core::error::TodoportError;
use crate::core::plan::TableSpec;
use crate::core::store::{ColumnInfo, Store};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeSet;

/// Answers "which columns does this destination table have". Lookups are cached
/// for the lifetime of the inspector; the schema is not expected to change mid-run.
pub struct SchemaInspector<'a> {
    store: &'a dyn Store,
    cache: RefCell<FxHashMap<String, Vec<ColumnInfo>>>,
}

impl<'a> SchemaInspector<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            cache: RefCell::new(FxHashMap::default()),
        }
    }

    pub fn describe(&self, table: &str) -> Result<Vec<ColumnInfo>, TodoportError> {
        if let Some(cols) = self.cache.borrow().get(table) {
            return Ok(cols.clone());
        }
        let cols = self.store.list_columns(table)?;
        self.cache
            .borrow_mut()
            .insert(table.to_string(), cols.clone());
        Ok(cols)
    }

    /// Column names of `table`; empty when the table does not exist.
    pub fn columns_of(&self, table: &str) -> Result<BTreeSet<String>, TodoportError> {
        Ok(self.describe(table)?.into_iter().map(|c| c.name).collect())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, TodoportError> {
        Ok(!self.describe(table)?.is_empty())
    }

    pub fn has_column(&self, table: &str, column: &str) -> Result<bool, TodoportError> {
        Ok(self.describe(table)?.iter().any(|c| c.name == column))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableVerification {
    pub table: String,
    pub destination: String,
    pub exists: bool,
    /// Required columns the destination lacks. Migration of this table will fail.
    pub missing_required: Vec<String>,
    /// Optional columns the destination lacks. They will be omitted from writes.
    pub missing_optional: Vec<String>,
    /// Referenced parent tables that do not exist in the destination.
    pub missing_parents: Vec<String>,
}

impl TableVerification {
    pub fn ok(&self) -> bool {
        self.exists && self.missing_required.is_empty() && self.missing_parents.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVerification {
    pub ok: bool,
    pub tables: Vec<TableVerification>,
}

/// Compares every table spec against the destination schema without touching data.
pub fn verify_plan(
    inspector: &SchemaInspector<'_>,
    specs: &[TableSpec],
) -> Result<SchemaVerification, TodoportError> {
    let mut tables = Vec::with_capacity(specs.len());
    for spec in specs {
        let destination = spec.destination_table();
        let present = inspector.columns_of(destination)?;
        let exists = !present.is_empty();

        let mut missing_required = Vec::new();
        let mut missing_optional = Vec::new();
        if exists {
            for col in &spec.columns {
                if present.contains(&col.name) {
                    continue;
                }
                if col.optional {
                    missing_optional.push(col.name.clone());
                } else {
                    missing_required.push(col.name.clone());
                }
            }
        }

        let mut missing_parents = Vec::new();
        for reference in &spec.references {
            if !inspector.has_column(&reference.table, &reference.parent_column)?
                && !missing_parents.contains(&reference.table)
            {
                missing_parents.push(reference.table.clone());
            }
        }

        tables.push(TableVerification {
            table: spec.name.clone(),
            destination: destination.to_string(),
            exists,
            missing_required,
            missing_optional,
            missing_parents,
        });
    }

    Ok(SchemaVerification {
        ok: tables.iter().all(TableVerification::ok),
        tables,
    })
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "inspect",
        "version": "0.1.0",
        "description": "Destination schema introspection and plan verification",
        "commands": [
            { "name": "verify", "description": "Compare the migration plan with the destination schema" }
        ],
        "storage": []
    })
}
