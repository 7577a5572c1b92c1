use crate::primitives::pager::{CommitRecord, PageSink, PageSource};
use crate::storage::btree;
use crate::storage::types::ValueKind;
use crate::types::{PageId, PenumbraError, Result};

/// One materialized index recorded in the catalog tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Indexed record type.
    pub type_name: String,
    /// Indexed field.
    pub field: String,
    /// Field kind at the time the index was built.
    pub kind: ValueKind,
}

impl CatalogEntry {
    fn key(&self) -> Vec<u8> {
        catalog_key(&self.type_name, &self.field)
    }
}

fn catalog_key(type_name: &str, field: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(type_name.len() + field.len() + 1);
    key.extend_from_slice(type_name.as_bytes());
    key.push(0);
    key.extend_from_slice(field.as_bytes());
    key
}

/// Snapshot of the index catalog.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Reads every entry of the catalog rooted at `root`.
    pub fn load<S: PageSource + ?Sized>(src: &S, root: PageId) -> Result<Self> {
        let mut cursor = btree::Cursor::all(root);
        let mut entries = Vec::new();
        while let Some((key, value)) = cursor.next(src)? {
            let split = key
                .iter()
                .position(|&b| b == 0)
                .ok_or(PenumbraError::Corruption("catalog key missing separator"))?;
            let text = |bytes: &[u8]| {
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| PenumbraError::Corruption("catalog name is not utf-8"))
            };
            let kind = value
                .first()
                .copied()
                .and_then(ValueKind::from_tag)
                .ok_or(PenumbraError::Corruption("catalog kind tag"))?;
            entries.push(CatalogEntry {
                type_name: text(&key[..split])?,
                field: text(&key[split + 1..])?,
                kind,
            });
        }
        Ok(Self { entries })
    }

    /// Entries ordered by type, then field.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Looks up the entry for `(type, field)`.
    pub fn get(&self, type_name: &str, field: &str) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| e.type_name == type_name && e.field == field)
    }

    /// Records `entry` as materialized.
    pub fn register<S: PageSink + ?Sized>(
        sink: &mut S,
        roots: &mut CommitRecord,
        entry: &CatalogEntry,
    ) -> Result<()> {
        roots.catalog_root =
            btree::insert(sink, roots.catalog_root, &entry.key(), &[entry.kind.tag()])?.0;
        Ok(())
    }

    /// Removes `entry` from the catalog.
    pub fn unregister<S: PageSink + ?Sized>(
        sink: &mut S,
        roots: &mut CommitRecord,
        entry: &CatalogEntry,
    ) -> Result<()> {
        roots.catalog_root = btree::remove(sink, roots.catalog_root, &entry.key())?.0;
        Ok(())
    }
}
