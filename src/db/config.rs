use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::primitives::pager::{PagerOptions, Synchronous};
use crate::storage::ValueKind;
use crate::types::{
    page::{self, DEFAULT_PAGE_SIZE},
    PenumbraError, Result,
};

const DEFAULT_CACHE_PAGES: usize = 1024;
/// Longest accepted type or field name, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// A declared field: name and value kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Kind every value of the field must have.
    pub kind: ValueKind,
}

/// Field table and indexed fields of one record type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeSchema {
    /// Record type name.
    pub name: String,
    /// Declared fields.
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Fields that carry a secondary equality index.
    #[serde(default)]
    pub indexes: Vec<String>,
}

impl TypeSchema {
    /// Starts a type with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Declares a field.
    pub fn field(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.fields.push(FieldDescriptor {
            name: name.into(),
            kind,
        });
        self
    }

    /// Declares an index on an already declared field.
    pub fn index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(field.into());
        self
    }
}

/// Options for opening a store.
///
/// Can be built in code or loaded from TOML:
///
/// ```toml
/// path = "bench.penumbra"
/// synchronous = "off"
///
/// [[type]]
/// name = "Item"
/// fields = [{ name = "number", kind = "string" }]
/// indexes = ["number"]
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Location of the store file.
    pub path: PathBuf,
    /// Page size used when the file is created.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Committed page images kept in the cache.
    #[serde(default = "default_cache_pages")]
    pub cache_pages: usize,
    /// Durability mode for commits.
    #[serde(default)]
    pub synchronous: Synchronous,
    /// Upper bound on the file size in pages.
    #[serde(default)]
    pub max_pages: Option<u64>,
    /// Verify every page read from disk.
    #[serde(default = "default_verify_checksums")]
    pub verify_checksums: bool,
    /// Record types.
    #[serde(default, rename = "type")]
    pub types: Vec<TypeSchema>,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_cache_pages() -> usize {
    DEFAULT_CACHE_PAGES
}

fn default_verify_checksums() -> bool {
    true
}

impl StoreConfig {
    /// Durable defaults for a store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            synchronous: Synchronous::Full,
            max_pages: None,
            verify_checksums: true,
            types: Vec::new(),
        }
    }

    /// Throughput-oriented preset: no fsync and a larger cache.
    pub fn benchmark(path: impl Into<PathBuf>) -> Self {
        Self {
            synchronous: Synchronous::Off,
            cache_pages: 16 * DEFAULT_CACHE_PAGES,
            ..Self::new(path)
        }
    }

    /// Adds a record type.
    pub fn with_type(mut self, schema: TypeSchema) -> Self {
        self.types.push(schema);
        self
    }

    /// Sets the durability mode.
    pub fn synchronous(mut self, synchronous: Synchronous) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Sets the page size used for new files.
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Caps the file at `max_pages` pages.
    pub fn max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Sets the page cache capacity.
    pub fn cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| PenumbraError::InvalidConfiguration(err.to_string()))
    }

    /// Reads and parses a TOML file. A relative `path` inside the file is
    /// resolved against the file's directory.
    pub fn load(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref();
        let text = fs::read_to_string(file)?;
        let mut config = Self::from_toml_str(&text)?;
        if config.path.is_relative() {
            if let Some(dir) = file.parent() {
                config.path = dir.join(&config.path);
            }
        }
        Ok(config)
    }

    /// Pager options derived from this configuration.
    pub fn pager_options(&self) -> PagerOptions {
        PagerOptions {
            page_size: self.page_size,
            cache_pages: self.cache_pages,
            synchronous: self.synchronous,
            max_pages: self.max_pages,
            verify_checksums: self.verify_checksums,
        }
    }

    /// Checks names, index declarations and page geometry.
    pub fn validate(&self) -> Result<()> {
        if !page::is_valid_page_size(self.page_size) {
            return Err(invalid(format!(
                "page size {} must be a power of two between {} and {}",
                self.page_size,
                page::MIN_PAGE_SIZE,
                page::MAX_PAGE_SIZE
            )));
        }
        if let Some(max_pages) = self.max_pages {
            if max_pages < 4 {
                return Err(invalid(format!("max_pages {max_pages} is below the minimum of 4")));
            }
        }
        let mut type_names = HashSet::new();
        for schema in &self.types {
            check_name("type", &schema.name)?;
            if !type_names.insert(schema.name.as_str()) {
                return Err(invalid(format!("duplicate type `{}`", schema.name)));
            }
            let mut field_names = HashSet::new();
            for field in &schema.fields {
                check_name("field", &field.name)?;
                if !field_names.insert(field.name.as_str()) {
                    return Err(invalid(format!(
                        "duplicate field `{}` on type `{}`",
                        field.name, schema.name
                    )));
                }
            }
            let mut indexed = HashSet::new();
            for index in &schema.indexes {
                if !field_names.contains(index.as_str()) {
                    return Err(invalid(format!(
                        "index on undeclared field `{}` of type `{}`",
                        index, schema.name
                    )));
                }
                if !indexed.insert(index.as_str()) {
                    return Err(invalid(format!(
                        "field `{}` of type `{}` is indexed twice",
                        index, schema.name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(format!("{what} name is empty")));
    }
    if name.contains('\0') {
        return Err(invalid(format!("{what} name {name:?} contains NUL")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(format!(
            "{what} name `{name}` is longer than {MAX_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

fn invalid(message: String) -> PenumbraError {
    PenumbraError::InvalidConfiguration(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> TypeSchema {
        TypeSchema::new("Item").field("number", ValueKind::String)
    }

    #[test]
    fn toml_document_parses_with_defaults() {
        let config = StoreConfig::from_toml_str(
            r#"
            path = "bench.db"
            synchronous = "off"

            [[type]]
            name = "Item"
            fields = [{ name = "number", kind = "string" }, { name = "rank", kind = "int" }]
            indexes = ["number"]
            "#,
        )
        .unwrap();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.synchronous, Synchronous::Off);
        assert!(config.verify_checksums);
        assert_eq!(config.types.len(), 1);
        assert_eq!(config.types[0].fields[1].kind, ValueKind::Int);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = StoreConfig::from_toml_str("path = \"x\"\nbogus = 1").unwrap_err();
        assert!(matches!(err, PenumbraError::InvalidConfiguration(_)));
    }

    #[test]
    fn index_must_name_declared_field() {
        let config = StoreConfig::new("x").with_type(item().index("missing"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("undeclared field `missing`"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let twice = StoreConfig::new("x").with_type(item()).with_type(item());
        assert!(twice.validate().is_err());
        let dup_field = StoreConfig::new("x").with_type(item().field("number", ValueKind::Int));
        assert!(dup_field.validate().is_err());
        let dup_index = StoreConfig::new("x").with_type(item().index("number").index("number"));
        assert!(dup_index.validate().is_err());
    }

    #[test]
    fn bad_names_and_geometry_are_rejected() {
        assert!(StoreConfig::new("x").with_type(TypeSchema::new("")).validate().is_err());
        assert!(StoreConfig::new("x")
            .with_type(TypeSchema::new("a\0b"))
            .validate()
            .is_err());
        assert!(StoreConfig::new("x")
            .with_type(TypeSchema::new("t".repeat(MAX_NAME_LEN + 1)))
            .validate()
            .is_err());
        assert!(StoreConfig::new("x").page_size(3000).validate().is_err());
        assert!(StoreConfig::new("x").max_pages(2).validate().is_err());
    }

    #[test]
    fn benchmark_preset_turns_off_sync() {
        let config = StoreConfig::benchmark("x");
        assert_eq!(config.pager_options().synchronous, Synchronous::Off);
        assert!(config.cache_pages > DEFAULT_CACHE_PAGES);
    }
}
