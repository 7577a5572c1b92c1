use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::db::{ReadTxn, Store};
use crate::primitives::pager::{CommitRecord, Pager};
use crate::storage::btree::{tree_shape, Cursor};
use crate::storage::index::{self, Catalog};
use crate::storage::record;
use crate::types::RecordId;

use crate::admin::Result;

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Walks every tree page, checking checksums and node structure.
    Fast,
    /// Also cross-checks records, extents, index entries and counters.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating data corruption or integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Warning,
            message: message.into(),
        }
    }
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Tree pages visited.
    pub pages_walked: u64,
    /// Records found in the record table.
    pub records_found: u64,
    /// Entries found in the extent table.
    pub extent_entries: u64,
    /// Entries found in the secondary index.
    pub index_entries: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Snapshot version that was checked.
    pub version: u64,
    /// Whether verification found no errors.
    pub success: bool,
    /// List of issues discovered during verification.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the data structures examined.
    pub counts: VerifyCounts,
}

/// Verifies the latest committed snapshot of `store`.
///
/// - `VerifyLevel::Fast`: every page of the four trees is loaded, so
///   checksum and node-format damage is caught.
/// - `VerifyLevel::Full`: additionally every record must have exactly one
///   extent entry, every indexed field value exactly one index entry (and
///   vice versa), the catalog must match the declared indexes and the
///   counters in the commit marker must match what was found.
///
/// Damage is reported as findings; an `Err` is only returned when the store
/// cannot be read at all.
pub fn verify(store: &Store, level: VerifyLevel) -> Result<VerifyReport> {
    let read = store.begin_read();
    let record = *read.commit_record();
    let pages = read.pages();
    let mut findings = Vec::new();
    let mut counts = VerifyCounts::default();

    let roots = [
        ("record", record.records_root),
        ("extent", record.extents_root),
        ("index", record.index_root),
        ("catalog", record.catalog_root),
    ];
    for (name, root) in roots {
        if !root.is_none() && root.0 >= record.next_page.0 {
            push_error(&mut findings, format!("{name} tree root {root} is past the end of the file"));
            continue;
        }
        match tree_shape(pages, root) {
            Ok(shape) => counts.pages_walked += shape.pages(),
            Err(err) => push_error(&mut findings, format!("{name} tree is unreadable: {err}")),
        }
    }

    if matches!(level, VerifyLevel::Full) && findings.is_empty() {
        let records = check_records(pages, &record, &mut findings, &mut counts)?;
        check_extents(pages, &record, &records, &mut findings, &mut counts)?;
        check_indexes(&read, &records, &mut findings, &mut counts)?;
    }

    Ok(VerifyReport {
        level,
        version: record.version.0,
        success: !findings.iter().any(|f| f.severity == VerifySeverity::Error),
        findings,
        counts,
    })
}

/// Loads every record; returns `id → type name`.
fn check_records(
    pages: &Pager,
    record: &CommitRecord,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> Result<HashMap<RecordId, String>> {
    let mut out = HashMap::new();
    let mut cursor = Cursor::all(record.records_root);
    while let Some((key, _)) = cursor.next(pages)? {
        let id = record::extent_id(&key)?;
        counts.records_found += 1;
        if id >= record.next_record_id {
            push_error(findings, format!("record {id} is not below the next id {}", record.next_record_id));
        }
        match record::get(pages, record.records_root, id) {
            Ok(Some(stored)) => {
                out.insert(id, stored.type_name);
            }
            Ok(None) => push_error(findings, format!("record {id} vanished during the walk")),
            Err(err) => push_error(findings, format!("record {id} is unreadable: {err}")),
        }
    }
    if counts.records_found != record.record_count {
        push_error(
            findings,
            format!(
                "commit marker counts {} records, found {}",
                record.record_count, counts.records_found
            ),
        );
    }
    Ok(out)
}

fn check_extents(
    pages: &Pager,
    record: &CommitRecord,
    records: &HashMap<RecordId, String>,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut cursor = Cursor::all(record.extents_root);
    while let Some((key, _)) = cursor.next(pages)? {
        counts.extent_entries += 1;
        let id = record::extent_id(&key)?;
        let type_name = String::from_utf8_lossy(&key[..key.len().saturating_sub(9)]).into_owned();
        match records.get(&id) {
            Some(actual) if *actual == type_name => {
                seen.insert(id);
            }
            Some(actual) => push_error(
                findings,
                format!("extent of `{type_name}` lists record {id} of type `{actual}`"),
            ),
            None => push_error(findings, format!("extent of `{type_name}` lists missing record {id}")),
        }
    }
    for id in records.keys() {
        if !seen.contains(id) {
            push_error(findings, format!("record {id} has no extent entry"));
        }
    }
    Ok(())
}

fn check_indexes(
    read: &ReadTxn,
    records: &HashMap<RecordId, String>,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> Result<()> {
    let pages = read.pages();
    let record = read.commit_record();
    let schema = read.schema();
    let declared = schema.declared_indexes();
    let catalog = Catalog::load(pages, record.catalog_root)?;
    if catalog.entries() != declared.as_slice() {
        push_error(findings, "index catalog does not match the declared indexes");
    }

    for entry in catalog.entries() {
        let listed = index::entries(pages, record.index_root, &entry.type_name, &entry.field)?;
        counts.index_entries += listed.len() as u64;
        let mut indexed = BTreeSet::new();
        for (value, id) in listed {
            let Some(stored) = read.get(id)? else {
                push_error(findings, format!("index {}.{} lists missing record {id}", entry.type_name, entry.field));
                continue;
            };
            if stored.type_name != entry.type_name || stored.get(&entry.field) != Some(&value) {
                push_error(
                    findings,
                    format!(
                        "index {}.{} maps {value} to record {id}, which holds {:?}",
                        entry.type_name,
                        entry.field,
                        stored.get(&entry.field).map(ToString::to_string)
                    ),
                );
            }
            if !indexed.insert(id) {
                push_error(findings, format!("record {id} indexed twice in {}.{}", entry.type_name, entry.field));
            }
        }
        for (id, type_name) in records {
            if *type_name != entry.type_name || indexed.contains(id) {
                continue;
            }
            if let Some(stored) = read.get(*id)? {
                if stored.get(&entry.field).is_some() {
                    push_error(
                        findings,
                        format!("record {id} has no entry in index {}.{}", entry.type_name, entry.field),
                    );
                }
            }
        }
    }

    for type_name in records.values().collect::<BTreeSet<_>>() {
        if schema.type_info(type_name).is_err() {
            push_warning(findings, format!("records of undeclared type `{type_name}`"));
        }
    }

    if counts.index_entries != record.index_entries {
        push_error(
            findings,
            format!(
                "commit marker counts {} index entries, found {}",
                record.index_entries, counts.index_entries
            ),
        );
    }
    Ok(())
}

fn push_error(findings: &mut Vec<VerifyFinding>, message: impl Into<String>) {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding::error(message.into()));
    }
}

fn push_warning(findings: &mut Vec<VerifyFinding>, message: impl Into<String>) {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding::warning(message.into()));
    }
}
