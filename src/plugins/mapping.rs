//! Legacy enumeration remapping.
//!
//! Each [`EnumDomain`] is data: the destination enumeration (`targets`), explicit
//! legacy rules, values that pass through unchanged, and an optional fallback.
//! Domains are validated once on load so every value `map` can return is a
//! member of the destination enumeration.

use crate::core::error::TodoportError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const BUILTIN_CATALOG: &str = include_str!("../assets/catalog.toml");

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnumDomain {
    pub name: String,
    pub targets: BTreeSet<String>,
    #[serde(default)]
    pub rules: BTreeMap<String, String>,
    #[serde(default)]
    pub passthrough: BTreeSet<String>,
    /// Used for values matched by neither `rules` nor `passthrough`. Without one,
    /// unknown values are a `MappingError`.
    #[serde(default)]
    pub fallback: Option<String>,
}

/// A mapped value and whether it came from the domain's fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapped {
    pub value: String,
    pub via_fallback: bool,
}

impl EnumDomain {
    pub fn map(&self, legacy: &str) -> Result<String, TodoportError> {
        self.resolve(legacy).map(|m| m.value)
    }

    pub fn resolve(&self, legacy: &str) -> Result<Mapped, TodoportError> {
        if let Some(target) = self.rules.get(legacy) {
            return Ok(Mapped {
                value: target.clone(),
                via_fallback: false,
            });
        }
        if self.passthrough.contains(legacy) {
            return Ok(Mapped {
                value: legacy.to_string(),
                via_fallback: false,
            });
        }
        match &self.fallback {
            Some(fallback) => Ok(Mapped {
                value: fallback.clone(),
                via_fallback: true,
            }),
            None => Err(TodoportError::MappingError {
                domain: self.name.clone(),
                value: legacy.to_string(),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), TodoportError> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push("domain name is empty".to_string());
        }
        if self.targets.is_empty() {
            problems.push("no target values declared".to_string());
        }
        for (legacy, target) in &self.rules {
            if !self.targets.contains(target) {
                problems.push(format!("rule {} -> {} leaves the target set", legacy, target));
            }
        }
        for value in &self.passthrough {
            if !self.targets.contains(value) {
                problems.push(format!("passthrough value {} is not a target", value));
            }
        }
        if let Some(fallback) = &self.fallback {
            if !self.targets.contains(fallback) {
                problems.push(format!("fallback {} is not a target", fallback));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(TodoportError::ValidationError(format!(
                "enum domain '{}': {}",
                self.name,
                problems.join("; ")
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    domains: Vec<EnumDomain>,
}

/// The set of enum domains available to a migration plan.
#[derive(Debug, Clone, Default)]
pub struct ValueMapper {
    domains: BTreeMap<String, EnumDomain>,
}

impl ValueMapper {
    pub fn new(domains: Vec<EnumDomain>) -> Result<Self, TodoportError> {
        Self::default().with_domains(domains)
    }

    /// The catalog shipped with the binary.
    pub fn builtin() -> Result<Self, TodoportError> {
        let file: CatalogFile = toml::from_str(BUILTIN_CATALOG)
            .map_err(|e| TodoportError::ConfigError(format!("built-in catalog: {}", e)))?;
        Self::new(file.domains)
    }

    /// Adds or replaces domains by name.
    pub fn with_domains(mut self, domains: Vec<EnumDomain>) -> Result<Self, TodoportError> {
        for domain in domains {
            domain.validate()?;
            self.domains.insert(domain.name.clone(), domain);
        }
        Ok(self)
    }

    pub fn map_enum(&self, domain: &str, legacy: &str) -> Result<String, TodoportError> {
        self.resolve_enum(domain, legacy).map(|m| m.value)
    }

    pub fn resolve_enum(&self, domain: &str, legacy: &str) -> Result<Mapped, TodoportError> {
        self.domain(domain)
            .ok_or_else(|| TodoportError::UnknownDomain(domain.to_string()))?
            .resolve(legacy)
    }

    pub fn domain(&self, name: &str) -> Option<&EnumDomain> {
        self.domains.get(name)
    }

    pub fn domains(&self) -> impl Iterator<Item = &EnumDomain> {
        self.domains.values()
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "mapping",
        "version": "0.1.0",
        "description": "Legacy enumeration remapping",
        "commands": [
            { "name": "catalog", "description": "List enum domains and their rules" },
            { "name": "map", "parameters": ["domain", "value"] }
        ],
        "storage": []
    })
}
