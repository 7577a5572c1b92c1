#![forbid(unsafe_code)]

//! Secondary equality indexes.
//!
//! All indexes share one B+ tree. An entry key is
//! `type \0 field \0 value-key id`, where the value key is the
//! memcomparable encoding from [`crate::storage::props::push_value_key`]
//! and the id is big-endian, so entries sort by value and then by id and an
//! equality lookup is a single prefix walk.

mod catalog;

pub use catalog::{Catalog, CatalogEntry};

use crate::primitives::pager::{CommitRecord, PageSink, PageSource};
use crate::types::{PageId, PenumbraError, RecordId, Result};
use tracing::debug;

use super::btree::{self, entry_len, max_entry_len};
use super::props::push_value_key;
use super::record::{self, RecordScan};
use super::types::{Record, Value};

/// Prefix shared by every entry of the `(type, field)` index.
pub fn index_prefix(type_name: &str, field: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(type_name.len() + field.len() + 2);
    key.extend_from_slice(type_name.as_bytes());
    key.push(0);
    key.extend_from_slice(field.as_bytes());
    key.push(0);
    key
}

fn value_prefix(type_name: &str, field: &str, value: &Value) -> Vec<u8> {
    let mut key = index_prefix(type_name, field);
    push_value_key(&mut key, value);
    key
}

/// Full entry key for `(type, field, value, id)`.
pub fn index_key(type_name: &str, field: &str, value: &Value, id: RecordId) -> Vec<u8> {
    let mut key = value_prefix(type_name, field, value);
    key.extend_from_slice(&record::record_key(id));
    key
}

/// Rejects values whose entry would not fit in an index node.
pub fn check_key_size(page_size: usize, type_name: &str, field: &str, value: &Value) -> Result<()> {
    let key = index_key(type_name, field, value, RecordId(0));
    if entry_len(&key, &[]) > max_entry_len(page_size) {
        return Err(PenumbraError::Invalid("indexed value exceeds maximum key size"));
    }
    Ok(())
}

/// Adds the entry for `id`.
pub fn insert_entry<S: PageSink + ?Sized>(
    sink: &mut S,
    roots: &mut CommitRecord,
    type_name: &str,
    field: &str,
    value: &Value,
    id: RecordId,
) -> Result<()> {
    check_key_size(sink.page_size(), type_name, field, value)?;
    let key = index_key(type_name, field, value, id);
    let (root, previous) = btree::insert(sink, roots.index_root, &key, &[])?;
    roots.index_root = root;
    if previous.is_none() {
        roots.index_entries += 1;
    }
    Ok(())
}

/// Removes the entry for `id`; returns whether it existed.
pub fn remove_entry<S: PageSink + ?Sized>(
    sink: &mut S,
    roots: &mut CommitRecord,
    type_name: &str,
    field: &str,
    value: &Value,
    id: RecordId,
) -> Result<bool> {
    let key = index_key(type_name, field, value, id);
    let (root, removed) = btree::remove(sink, roots.index_root, &key)?;
    roots.index_root = root;
    if removed.is_some() {
        roots.index_entries = roots.index_entries.saturating_sub(1);
    }
    Ok(removed.is_some())
}

/// Adds entries for every field of `record` listed in `indexed`.
pub fn index_record<S: PageSink + ?Sized>(
    sink: &mut S,
    roots: &mut CommitRecord,
    record: &Record,
    indexed: &[String],
) -> Result<()> {
    for field in indexed {
        if let Some(value) = record.fields.get(field) {
            insert_entry(sink, roots, &record.type_name, field, value, record.id)?;
        }
    }
    Ok(())
}

/// Removes entries for every field of `record` listed in `indexed`.
pub fn unindex_record<S: PageSink + ?Sized>(
    sink: &mut S,
    roots: &mut CommitRecord,
    record: &Record,
    indexed: &[String],
) -> Result<()> {
    for field in indexed {
        if let Some(value) = record.fields.get(field) {
            remove_entry(sink, roots, &record.type_name, field, value, record.id)?;
        }
    }
    Ok(())
}

/// Ids whose `field` equals `value`, ascending.
pub fn lookup_equal<S: PageSource + ?Sized>(
    src: &S,
    index_root: PageId,
    type_name: &str,
    field: &str,
    value: &Value,
) -> Result<Vec<RecordId>> {
    let prefix = value_prefix(type_name, field, value);
    let mut cursor = btree::Cursor::prefix(index_root, &prefix);
    let mut ids = Vec::new();
    while let Some((key, _)) = cursor.next(src)? {
        if key.len() != prefix.len() + 8 {
            return Err(PenumbraError::Corruption("index key length mismatch"));
        }
        ids.push(record::extent_id(&key)?);
    }
    Ok(ids)
}

/// Every `(value, id)` entry of one index in key order.
pub fn entries<S: PageSource + ?Sized>(
    src: &S,
    index_root: PageId,
    type_name: &str,
    field: &str,
) -> Result<Vec<(Value, RecordId)>> {
    let prefix = index_prefix(type_name, field);
    let mut cursor = btree::Cursor::prefix(index_root, &prefix);
    let mut out = Vec::new();
    while let Some((key, _)) = cursor.next(src)? {
        let (value, used) = super::props::split_value_key(&key[prefix.len()..])?;
        if prefix.len() + used + 8 != key.len() {
            return Err(PenumbraError::Corruption("index key length mismatch"));
        }
        out.push((value, record::extent_id(&key)?));
    }
    Ok(out)
}

/// Builds the `(type, field)` index from the records already stored.
pub fn backfill<S: PageSink + ?Sized>(
    sink: &mut S,
    roots: &mut CommitRecord,
    type_name: &str,
    field: &str,
) -> Result<u64> {
    let snapshot = *roots;
    let mut records = Vec::new();
    for record in RecordScan::new(&*sink, &snapshot, type_name) {
        let record = record?;
        if let Some(value) = record.fields.get(field) {
            records.push((record.id, value.clone()));
        }
    }
    for (id, value) in &records {
        insert_entry(sink, roots, type_name, field, value, *id)?;
    }
    debug!(
        type_name,
        field,
        entries = records.len(),
        "store.index.backfill"
    );
    Ok(records.len() as u64)
}

/// Removes every entry of the `(type, field)` index.
pub fn drop_index<S: PageSink + ?Sized>(
    sink: &mut S,
    roots: &mut CommitRecord,
    type_name: &str,
    field: &str,
) -> Result<u64> {
    let prefix = index_prefix(type_name, field);
    let mut keys = Vec::new();
    let mut cursor = btree::Cursor::prefix(roots.index_root, &prefix);
    while let Some((key, _)) = cursor.next(&*sink)? {
        keys.push(key);
    }
    for key in &keys {
        let (root, removed) = btree::remove(sink, roots.index_root, key)?;
        roots.index_root = root;
        if removed.is_some() {
            roots.index_entries = roots.index_entries.saturating_sub(1);
        }
    }
    debug!(type_name, field, entries = keys.len(), "store.index.drop");
    Ok(keys.len() as u64)
}

/// Releases the whole index tree. The catalog is left untouched, so every
/// declared index stays registered with zero entries.
pub fn clear<S: PageSink + ?Sized>(sink: &mut S, roots: &mut CommitRecord) -> Result<u64> {
    let removed = roots.index_entries;
    btree::free_tree(sink, roots.index_root)?;
    roots.index_root = PageId::NONE;
    roots.index_entries = 0;
    Ok(removed)
}
