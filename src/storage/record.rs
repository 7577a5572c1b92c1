//! Record table and per-type extents.
//!
//! The record table maps a big-endian [`RecordId`] to the stored record:
//! a body tag, the type name and either the encoded field map or a
//! reference to an overflow chain. The extent table keys `type \0 id` with
//! an empty value so a type's records can be walked in id order.

use crate::primitives::bytes::{buf::Cursor, var};
use crate::primitives::pager::{CommitRecord, PageSink, PageSource};
use crate::types::{PageId, PenumbraError, RecordId, Result};

use super::btree::{self, entry_len, max_entry_len};
use super::props::{decode_fields, encode_fields};
use super::types::{Fields, Record};
use super::vstore::{self, VRef};

const BODY_INLINE: u8 = 0;
const BODY_OVERFLOW: u8 = 1;

/// Key of `id` in the record table.
pub fn record_key(id: RecordId) -> [u8; 8] {
    id.0.to_be_bytes()
}

/// Prefix shared by every extent entry of `type_name`.
pub fn extent_prefix(type_name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(type_name.len() + 9);
    key.extend_from_slice(type_name.as_bytes());
    key.push(0);
    key
}

fn extent_key(type_name: &str, id: RecordId) -> Vec<u8> {
    let mut key = extent_prefix(type_name);
    key.extend_from_slice(&record_key(id));
    key
}

/// Extracts the record id from an extent key.
pub fn extent_id(key: &[u8]) -> Result<RecordId> {
    let tail = key
        .len()
        .checked_sub(8)
        .map(|start| &key[start..])
        .ok_or(PenumbraError::Corruption("extent key truncated"))?;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(tail);
    Ok(RecordId(u64::from_be_bytes(bytes)))
}

/// Body of a record-table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
enum StoredBody {
    Inline(Vec<u8>),
    Overflow(VRef),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct StoredRecord {
    type_name: String,
    body: StoredBody,
}

impl StoredRecord {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.body {
            StoredBody::Inline(body) => {
                out.push(BODY_INLINE);
                var::encode_bytes(self.type_name.as_bytes(), &mut out);
                out.extend_from_slice(body);
            }
            StoredBody::Overflow(vref) => {
                out.push(BODY_OVERFLOW);
                var::encode_bytes(self.type_name.as_bytes(), &mut out);
                vref.encode(&mut out);
            }
        }
        out
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(buf);
        let tag = cur.u8()?;
        let type_name = String::from_utf8(cur.var_bytes()?.to_vec())
            .map_err(|_| PenumbraError::Corruption("record type name is not utf-8"))?;
        let rest = cur.take(cur.remaining())?;
        let body = match tag {
            BODY_INLINE => StoredBody::Inline(rest.to_vec()),
            BODY_OVERFLOW => StoredBody::Overflow(VRef::decode(rest)?),
            _ => return Err(PenumbraError::Corruption("unknown record body tag")),
        };
        Ok(Self { type_name, body })
    }

    fn materialize<S: PageSource + ?Sized>(self, src: &S, id: RecordId) -> Result<Record> {
        let fields = match &self.body {
            StoredBody::Inline(body) => decode_fields(body)?,
            StoredBody::Overflow(vref) => decode_fields(&vstore::read(src, *vref)?)?,
        };
        Ok(Record {
            id,
            type_name: self.type_name,
            fields,
        })
    }

    fn release<S: PageSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        match self.body {
            StoredBody::Inline(_) => Ok(()),
            StoredBody::Overflow(vref) => vstore::free(sink, vref),
        }
    }
}

/// Builds the stored form of a body, spilling it to an overflow chain when
/// the inline entry would not fit in a tree node.
fn store_body<S: PageSink + ?Sized>(sink: &mut S, type_name: &str, fields: &Fields) -> Result<StoredRecord> {
    let mut stored = StoredRecord {
        type_name: type_name.to_owned(),
        body: StoredBody::Inline(encode_fields(fields)),
    };
    if entry_len(&[0; 8], &stored.encode()) > max_entry_len(sink.page_size()) {
        if let StoredBody::Inline(body) = &stored.body {
            stored.body = StoredBody::Overflow(vstore::write(sink, body)?);
        }
    }
    Ok(stored)
}

/// Writes a new record and its extent entry. Assigns the next id.
pub fn insert<S: PageSink + ?Sized>(
    sink: &mut S,
    roots: &mut CommitRecord,
    type_name: &str,
    fields: &Fields,
) -> Result<RecordId> {
    let id = roots.next_record_id;
    let stored = store_body(sink, type_name, fields)?;
    let (records_root, previous) =
        btree::insert(sink, roots.records_root, &record_key(id), &stored.encode())?;
    if previous.is_some() {
        return Err(PenumbraError::Corruption("record id reused"));
    }
    roots.records_root = records_root;
    roots.extents_root = btree::insert(sink, roots.extents_root, &extent_key(type_name, id), &[])?.0;
    roots.next_record_id = RecordId(id.0 + 1);
    roots.record_count += 1;
    Ok(id)
}

/// Replaces the fields of `id`, returning the previous record.
pub fn replace<S: PageSink + ?Sized>(
    sink: &mut S,
    roots: &mut CommitRecord,
    id: RecordId,
    fields: &Fields,
) -> Result<Option<Record>> {
    let Some(raw) = btree::get(sink, roots.records_root, &record_key(id))? else {
        return Ok(None);
    };
    let old = StoredRecord::decode(&raw)?;
    let previous = old.clone().materialize(sink, id)?;
    old.release(sink)?;
    let stored = store_body(sink, &old.type_name, fields)?;
    roots.records_root = btree::insert(sink, roots.records_root, &record_key(id), &stored.encode())?.0;
    Ok(Some(previous))
}

/// Removes `id` and its extent entry, releasing overflow pages. Returns the
/// removed record so callers can drop its index entries.
pub fn remove<S: PageSink + ?Sized>(
    sink: &mut S,
    roots: &mut CommitRecord,
    id: RecordId,
) -> Result<Option<Record>> {
    let Some(raw) = btree::get(sink, roots.records_root, &record_key(id))? else {
        return Ok(None);
    };
    let stored = StoredRecord::decode(&raw)?;
    let record = stored.clone().materialize(sink, id)?;
    stored.release(sink)?;
    roots.records_root = btree::remove(sink, roots.records_root, &record_key(id))?.0;
    roots.extents_root = btree::remove(sink, roots.extents_root, &extent_key(&record.type_name, id))?.0;
    roots.record_count = roots.record_count.saturating_sub(1);
    Ok(Some(record))
}

/// Loads `id` from the snapshot rooted at `records_root`.
pub fn get<S: PageSource + ?Sized>(
    src: &S,
    records_root: PageId,
    id: RecordId,
) -> Result<Option<Record>> {
    match btree::get(src, records_root, &record_key(id))? {
        Some(raw) => Ok(Some(StoredRecord::decode(&raw)?.materialize(src, id)?)),
        None => Ok(None),
    }
}

/// Lazy, restartable scan over the records of one type in id order.
pub struct RecordScan<S: PageSource> {
    src: S,
    records_root: PageId,
    cursor: btree::Cursor,
}

impl<S: PageSource> RecordScan<S> {
    /// Scans `type_name` in the snapshot described by `roots`.
    pub fn new(src: S, roots: &CommitRecord, type_name: &str) -> Self {
        Self {
            src,
            records_root: roots.records_root,
            cursor: btree::Cursor::prefix(roots.extents_root, &extent_prefix(type_name)),
        }
    }

    /// Rewinds to the first record.
    pub fn restart(&mut self) {
        self.cursor.restart();
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let Some((key, _)) = self.cursor.next(&self.src)? else {
            return Ok(None);
        };
        let id = extent_id(&key)?;
        get(&self.src, self.records_root, id)?
            .map(Some)
            .ok_or(PenumbraError::Corruption("extent entry without record"))
    }

    /// Ids of the remaining records, without decoding bodies.
    pub fn next_id(&mut self) -> Result<Option<RecordId>> {
        match self.cursor.next(&self.src)? {
            Some((key, _)) => Ok(Some(extent_id(&key)?)),
            None => Ok(None),
        }
    }
}

impl<S: PageSource> Iterator for RecordScan<S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Counts the records of `type_name` by walking its extent.
pub fn count<S: PageSource + ?Sized>(src: &S, extents_root: PageId, type_name: &str) -> Result<u64> {
    let mut cursor = btree::Cursor::prefix(extents_root, &extent_prefix(type_name));
    let mut total = 0;
    while cursor.next(src)?.is_some() {
        total += 1;
    }
    Ok(total)
}

/// Drops every record of every type. Overflow chains are released before
/// the record and extent trees themselves. Returns the number removed.
pub fn clear<S: PageSink + ?Sized>(sink: &mut S, roots: &mut CommitRecord) -> Result<u64> {
    let mut chains = Vec::new();
    let mut removed = 0u64;
    let mut cursor = btree::Cursor::all(roots.records_root);
    while let Some((_, raw)) = cursor.next(&*sink)? {
        if let StoredBody::Overflow(vref) = StoredRecord::decode(&raw)?.body {
            chains.push(vref);
        }
        removed += 1;
    }
    for vref in chains {
        vstore::free(sink, vref)?;
    }
    btree::free_tree(sink, roots.records_root)?;
    btree::free_tree(sink, roots.extents_root)?;
    roots.records_root = PageId::NONE;
    roots.extents_root = PageId::NONE;
    roots.record_count = 0;
    Ok(removed)
}
