//! `todoport.toml` loading.
//!
//! The file is optional. Without it the built-in catalog and TodoApp plan
//! apply, and paths come from CLI flags.

use crate::core::error::TodoportError;
use crate::core::plan::{self, TableSpec};
use crate::plugins::mapping::{EnumDomain, ValueMapper};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "todoport.toml";
pub const DEFAULT_JOURNAL_PATH: &str = ".todoport/events.jsonl";
pub const DEFAULT_SOURCE_NAMESPACE: &str = "legacy";
pub const DEFAULT_PREFIX: &str = "TODOAAPP.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Legacy database, attached to the destination connection as `source_namespace`.
    pub source: Option<PathBuf>,
    pub destination: Option<PathBuf>,
    pub source_namespace: Option<String>,
    pub journal: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewriteConfig {
    pub root: Option<PathBuf>,
    pub prefix: Option<String>,
    /// Defaults to every destination table in the plan.
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub accessors: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoportConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub rewrite: RewriteConfig,
    /// Added to, or replacing by name, the built-in catalog.
    #[serde(default)]
    pub domains: Vec<EnumDomain>,
    /// Replaces the built-in plan entirely when non-empty.
    #[serde(default)]
    pub tables: Vec<TableSpec>,
}

impl TodoportConfig {
    pub fn parse(content: &str) -> Result<Self, TodoportError> {
        toml::from_str(content).map_err(|e| TodoportError::ConfigError(e.to_string()))
    }

    pub fn mapper(&self) -> Result<ValueMapper, TodoportError> {
        ValueMapper::builtin()?.with_domains(self.domains.clone())
    }

    pub fn plan(&self) -> Result<Vec<TableSpec>, TodoportError> {
        if self.tables.is_empty() {
            plan::todoapp_plan()
        } else {
            Ok(self.tables.clone())
        }
    }

    pub fn source_namespace(&self) -> &str {
        self.run
            .source_namespace
            .as_deref()
            .unwrap_or(DEFAULT_SOURCE_NAMESPACE)
    }

    pub fn rewrite_prefix(&self) -> &str {
        self.rewrite.prefix.as_deref().unwrap_or(DEFAULT_PREFIX)
    }

    /// Tables the rewriter targets: the configured list or the plan's destinations.
    pub fn rewrite_tables(&self) -> Result<Vec<String>, TodoportError> {
        if !self.rewrite.tables.is_empty() {
            return Ok(self.rewrite.tables.clone());
        }
        let mut tables: Vec<String> = self
            .plan()?
            .iter()
            .map(|s| s.destination_table().to_string())
            .collect();
        tables.dedup();
        Ok(tables)
    }
}

/// Loads `explicit` if given (it must exist), else `todoport.toml` under `dir`
/// when present, else defaults.
pub fn load_config(explicit: Option<&Path>, dir: &Path) -> Result<TodoportConfig, TodoportError> {
    let path = match explicit {
        Some(p) => {
            if !p.exists() {
                return Err(TodoportError::NotFound(format!(
                    "config file {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => {
            let candidate = dir.join(CONFIG_FILE_NAME);
            if !candidate.exists() {
                return Ok(TodoportConfig::default());
            }
            candidate
        }
    };
    let content = fs::read_to_string(&path)?;
    TodoportConfig::parse(&content)
        .map_err(|e| TodoportError::ConfigError(format!("{}: {}", path.display(), e)))
}
