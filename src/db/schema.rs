use std::collections::HashMap;

use crate::storage::index::CatalogEntry;
use crate::storage::{Fields, Value, ValueKind};
use crate::types::{PenumbraError, Result};

use super::config::StoreConfig;

/// Resolved descriptor table of one record type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    name: String,
    fields: HashMap<String, ValueKind>,
    indexes: Vec<String>,
}

impl TypeInfo {
    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Indexed fields in declaration order.
    pub fn indexes(&self) -> &[String] {
        &self.indexes
    }

    /// True if `field` carries an index.
    pub fn is_indexed(&self, field: &str) -> bool {
        self.indexes.iter().any(|f| f == field)
    }

    /// Declared kind of `field`.
    pub fn field_kind(&self, field: &str) -> Result<ValueKind> {
        self.fields.get(field).copied().ok_or_else(|| {
            PenumbraError::Schema(format!("type `{}` has no field `{field}`", self.name))
        })
    }

    /// Checks that every present field is declared with the value's kind.
    pub fn check_fields(&self, fields: &Fields) -> Result<()> {
        for (name, value) in fields {
            self.check_value(name, value)?;
        }
        Ok(())
    }

    /// Checks a single value against the declared kind of `field`.
    pub fn check_value(&self, field: &str, value: &Value) -> Result<()> {
        let kind = self.field_kind(field)?;
        if value.kind() != kind {
            return Err(PenumbraError::Schema(format!(
                "field `{}.{field}` expects {kind}, got {}",
                self.name,
                value.kind()
            )));
        }
        Ok(())
    }
}

/// Descriptor tables of every configured type. Immutable once the store is
/// open.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<String, TypeInfo>,
}

impl Schema {
    /// Builds the schema of a validated configuration.
    pub fn from_config(config: &StoreConfig) -> Self {
        let types = config
            .types
            .iter()
            .map(|schema| {
                let info = TypeInfo {
                    name: schema.name.clone(),
                    fields: schema
                        .fields
                        .iter()
                        .map(|f| (f.name.clone(), f.kind))
                        .collect(),
                    indexes: schema.indexes.clone(),
                };
                (schema.name.clone(), info)
            })
            .collect();
        Self { types }
    }

    /// Looks up a type, failing with `Schema` when it is not configured.
    pub fn type_info(&self, type_name: &str) -> Result<&TypeInfo> {
        self.types
            .get(type_name)
            .ok_or_else(|| PenumbraError::Schema(format!("unknown type `{type_name}`")))
    }

    /// Every configured type name, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Indexes the configuration declares, as catalog entries.
    pub fn declared_indexes(&self) -> Vec<CatalogEntry> {
        let mut out = Vec::new();
        for info in self.types.values() {
            for field in &info.indexes {
                if let Some(&kind) = info.fields.get(field) {
                    out.push(CatalogEntry {
                        type_name: info.name.clone(),
                        field: field.clone(),
                        kind,
                    });
                }
            }
        }
        out.sort_by(|a, b| (&a.type_name, &a.field).cmp(&(&b.type_name, &b.field)));
        out
    }
}
