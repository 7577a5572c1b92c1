use serde::Serialize;

use crate::db::Store;
use crate::primitives::pager::PagerStats;
use crate::storage::btree::{tree_shape, TreeShape};
use crate::storage::record;

use crate::admin::Result;

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub snapshot: SnapshotSection,
    pub pager: PagerSection,
    pub trees: TreesSection,
    pub free_pages: FreePagesSection,
    pub locks: LockSection,
    pub types: Vec<TypeStats>,
    pub filesystem: FilesystemStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSection {
    pub version: u64,
    pub record_count: u64,
    pub index_entries: u64,
    pub next_record_id: u64,
    pub next_page: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PagerSection {
    pub page_size: u32,
    #[serde(flatten)]
    pub counters: PagerStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreesSection {
    pub records: TreeShape,
    pub extents: TreeShape,
    pub index: TreeShape,
    pub catalog: TreeShape,
}

#[derive(Debug, Clone, Serialize)]
pub struct FreePagesSection {
    pub reclaimable: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockSection {
    pub readers: u32,
    pub writer: bool,
    pub oldest_reader: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeStats {
    pub name: String,
    pub records: u64,
    pub indexes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilesystemStats {
    pub path: String,
    pub size_bytes: u64,
}

/// Gathers counters and tree shapes from the latest snapshot of `store`.
pub fn stats(store: &Store) -> Result<StatsReport> {
    let read = store.begin_read();
    let record = *read.commit_record();
    let pages = read.pages();

    let snapshot = SnapshotSection {
        version: record.version.0,
        record_count: record.record_count,
        index_entries: record.index_entries,
        next_record_id: record.next_record_id.0,
        next_page: record.next_page.0,
    };
    let trees = TreesSection {
        records: tree_shape(pages, record.records_root)?,
        extents: tree_shape(pages, record.extents_root)?,
        index: tree_shape(pages, record.index_root)?,
        catalog: tree_shape(pages, record.catalog_root)?,
    };

    let mut types = Vec::new();
    for name in read.schema().type_names() {
        let info = read.schema().type_info(name)?;
        types.push(TypeStats {
            name: name.to_owned(),
            records: record::count(pages, record.extents_root, name)?,
            indexes: info.indexes().to_vec(),
        });
    }

    let (reclaimable, pending) = store.free_pages();
    // the report's own reader is not interesting
    drop(read);
    let locks = store.lock_snapshot();

    Ok(StatsReport {
        snapshot,
        pager: PagerSection {
            page_size: store.page_size(),
            counters: store.pager_stats(),
        },
        trees,
        free_pages: FreePagesSection {
            reclaimable,
            pending,
        },
        locks: LockSection {
            readers: locks.readers,
            writer: locks.writer,
            oldest_reader: locks.oldest_reader.map(|v| v.0),
        },
        types,
        filesystem: FilesystemStats {
            path: store.path().display().to_string(),
            size_bytes: store.file_len()?,
        },
    })
}
