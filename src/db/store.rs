use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::primitives::concurrency::{LockSnapshot, SingleWriter};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::pager::{CommitRecord, FreeList, Pager, PagerStats};
use crate::query::{QueryPlan, QueryStrategy};
use crate::storage::{Record, Value};
use crate::types::{RecordId, Result, Version};

use super::config::StoreConfig;
use super::schema::Schema;
use super::transaction::{ReadTxn, WriteTxn};

/// Newest published snapshot and the free space it leaves.
pub(crate) struct Committed {
    pub(crate) record: CommitRecord,
    pub(crate) free: FreeList,
}

pub(crate) struct StoreInner {
    pub(crate) pager: Pager,
    pub(crate) schema: Schema,
    pub(crate) locks: SingleWriter,
    pub(crate) committed: Mutex<Committed>,
    path: PathBuf,
}

/// Handle to an open store. Cheap to clone and safe to share across threads.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Opens the store file named by `config`, creating it if needed.
    ///
    /// Declared indexes that the file does not have yet are built from the
    /// existing records, and indexes that are no longer declared are
    /// dropped, before the handle is returned.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&config.path)?);
        Self::open_with_io(config, io)
    }

    /// Like [`Store::open`] over a caller-supplied file, e.g. a
    /// [`FaultyIo`](crate::FaultyIo).
    pub fn open_with_io(config: StoreConfig, io: Arc<dyn FileIo>) -> Result<Self> {
        config.validate()?;
        let (pager, record, free) = Pager::open(io, config.pager_options())?;
        let store = Self {
            inner: Arc::new(StoreInner {
                pager,
                schema: Schema::from_config(&config),
                locks: SingleWriter::new(),
                committed: Mutex::new(Committed { record, free }),
                path: config.path,
            }),
        };
        let mut txn = store.begin_write()?;
        let changes = txn.reconcile_indexes()?;
        txn.commit()?;
        info!(
            path = %store.inner.path.display(),
            version = store.version().0,
            index_changes = changes,
            "store.open"
        );
        Ok(store)
    }

    /// Starts the write transaction. Fails with `AlreadyWriting` if one is
    /// open; never waits.
    pub fn begin_write(&self) -> Result<WriteTxn> {
        WriteTxn::begin(Arc::clone(&self.inner))
    }

    /// Pins the latest committed snapshot. Never blocks.
    pub fn begin_read(&self) -> ReadTxn {
        ReadTxn::begin(Arc::clone(&self.inner))
    }

    /// Runs `block` in a write transaction that commits when it returns
    /// `Ok` and aborts when it returns `Err`.
    pub fn write<T>(&self, block: impl FnOnce(&mut WriteTxn) -> Result<T>) -> Result<T> {
        let mut txn = self.begin_write()?;
        match block(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                txn.abort();
                Err(err)
            }
        }
    }

    /// Every record of `type_name` in the latest snapshot, ascending by id.
    pub fn read(&self, type_name: &str) -> Result<Vec<Record>> {
        self.begin_read().scan_all(type_name)?.collect()
    }

    /// Reads `id` from the latest snapshot.
    pub fn get(&self, id: RecordId) -> Result<Option<Record>> {
        self.begin_read().get(id)
    }

    /// Ids of `type_name` records whose `field` equals `value`, using the
    /// index when the field has one.
    pub fn find_equal(&self, type_name: &str, field: &str, value: &Value) -> Result<Vec<RecordId>> {
        self.begin_read().find_equal(type_name, field, value)
    }

    /// [`find_equal`](Self::find_equal) with an explicit strategy.
    pub fn find_equal_with(
        &self,
        type_name: &str,
        field: &str,
        value: &Value,
        strategy: QueryStrategy,
    ) -> Result<Vec<RecordId>> {
        self.begin_read()
            .find_equal_with(type_name, field, value, strategy)
    }

    /// Plan `find_equal` would use for `type_name.field`.
    pub fn explain(&self, type_name: &str, field: &str) -> Result<QueryPlan> {
        self.begin_read().explain(type_name, field)
    }

    /// Deletes every record in one transaction; returns how many.
    pub fn delete_all(&self) -> Result<u64> {
        self.write(|txn| txn.delete_all())
    }

    /// Live records of `type_name` in the latest snapshot.
    pub fn count(&self, type_name: &str) -> Result<u64> {
        self.begin_read().count(type_name)
    }

    /// Latest committed version.
    pub fn version(&self) -> Version {
        self.inner.committed.lock().record.version
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Schema the store was opened with.
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Page size of the file.
    pub fn page_size(&self) -> u32 {
        self.inner.pager.header().page_size
    }

    /// Pager cache and I/O counters.
    pub fn pager_stats(&self) -> PagerStats {
        self.inner.pager.stats()
    }

    /// Writer and reader pins currently held.
    pub fn lock_snapshot(&self) -> LockSnapshot {
        self.inner.locks.snapshot()
    }

    /// Reusable and still-pinned free pages of the committed state.
    pub fn free_pages(&self) -> (usize, usize) {
        let committed = self.inner.committed.lock();
        (
            committed.free.reclaimable_count(),
            committed.free.pending_count(),
        )
    }

    /// Current size of the store file in bytes.
    pub fn file_len(&self) -> Result<u64> {
        self.inner.pager.file_len()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .field("version", &self.version())
            .finish()
    }
}
