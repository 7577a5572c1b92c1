use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::primitives::concurrency::{ReaderGuard, WriterGuard};
use crate::primitives::pager::{
    CommitRecord, FreeList, PageAllocator, PageSource, Pager, StagedPages, TxnPages, TxnView,
};
use crate::query::{self, QueryPlan, QueryStrategy};
use crate::storage::index::{self, Catalog};
use crate::storage::{record, Fields, Record, RecordScan, Value};
use crate::types::{PageId, PenumbraError, RecordId, Result, Version};

use super::schema::Schema;
use super::store::StoreInner;

/// Lifecycle of a write transaction.
///
/// `Open → Committing → Committed`, or `Open → Aborted`. A commit that fails
/// drops back to `Open` with every staged change intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting mutations.
    Open,
    /// Writing pages and the commit marker.
    Committing,
    /// Published; no further operations are accepted.
    Committed,
    /// Discarded; no further operations are accepted.
    Aborted,
}

/// The single write transaction of a store.
///
/// Mutations are staged as copy-on-write page images private to the
/// transaction and become visible to new readers only when [`commit`]
/// succeeds. Every mutation is all-or-nothing: if it fails, the transaction
/// is left exactly as it was before the call.
///
/// Dropping an open transaction aborts it.
///
/// ```no_run
/// use penumbra::{fields, Store, StoreConfig, TypeSchema, ValueKind};
///
/// let config = StoreConfig::new("items.penumbra")
///     .with_type(TypeSchema::new("Item").field("number", ValueKind::String).index("number"));
/// let store = Store::open(config)?;
/// let mut txn = store.begin_write()?;
/// let id = txn.insert("Item", fields([("number", "42")]))?;
/// txn.commit()?;
/// assert_eq!(store.find_equal("Item", "number", &"42".into())?, vec![id]);
/// # Ok::<(), penumbra::PenumbraError>(())
/// ```
///
/// [`commit`]: WriteTxn::commit
pub struct WriteTxn {
    inner: Arc<StoreInner>,
    writer: Option<WriterGuard>,
    base: CommitRecord,
    roots: CommitRecord,
    staged: StagedPages,
    state: TxnState,
    started: Instant,
}

impl WriteTxn {
    pub(crate) fn begin(inner: Arc<StoreInner>) -> Result<Self> {
        let writer = inner.locks.try_acquire_writer()?;
        let (base, free) = {
            let mut committed = inner.committed.lock();
            let oldest = inner.locks.oldest_reader();
            let reclaimed = committed.free.reclaim(oldest);
            if reclaimed > 0 {
                debug!(reclaimed, oldest_reader = ?oldest.map(|v| v.0), "txn.begin.reclaim");
            }
            (committed.record, committed.free.clone())
        };
        let alloc = PageAllocator::new(free, base.next_page, inner.pager.options().max_pages);
        debug!(version = base.version.0, "txn.begin");
        Ok(Self {
            inner,
            writer: Some(writer),
            base,
            roots: base,
            staged: StagedPages::new(alloc),
            state: TxnState::Open,
            started: Instant::now(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            TxnState::Open => Ok(()),
            _ => Err(PenumbraError::NoActiveTransaction),
        }
    }

    /// Runs one mutation under a savepoint. On error the staged pages, the
    /// allocator and the working roots are restored to their state before
    /// the call.
    fn mutate<T>(
        &mut self,
        op: impl FnOnce(&mut TxnPages<'_>, &mut CommitRecord, &Schema) -> Result<T>,
    ) -> Result<T> {
        self.ensure_open()?;
        let saved = self.roots;
        self.staged.savepoint();
        let mut pages = TxnPages::new(&self.inner.pager, &mut self.staged);
        let result = op(&mut pages, &mut self.roots, &self.inner.schema);
        match result {
            Ok(value) => {
                self.staged.release();
                Ok(value)
            }
            Err(err) => {
                self.staged.rollback();
                self.roots = saved;
                debug!(error = %err, "txn.mutation.rolled_back");
                Err(err)
            }
        }
    }

    fn view(&self) -> TxnView<'_> {
        TxnView::new(&self.inner.pager, &self.staged)
    }

    /// Inserts a record of `type_name` and returns its new id.
    ///
    /// Every present field must be declared with the value's kind; missing
    /// fields are allowed and simply have no index entry.
    pub fn insert(&mut self, type_name: &str, fields: Fields) -> Result<RecordId> {
        self.mutate(|pages, roots, schema| {
            let info = schema.type_info(type_name)?;
            info.check_fields(&fields)?;
            for field in info.indexes() {
                if let Some(value) = fields.get(field) {
                    index::check_key_size(pages.page_size(), type_name, field, value)?;
                }
            }
            let id = record::insert(pages, roots, type_name, &fields)?;
            let stored = Record {
                id,
                type_name: type_name.to_owned(),
                fields,
            };
            index::index_record(pages, roots, &stored, info.indexes())?;
            Ok(id)
        })
    }

    /// Replaces the fields of `id`. Index entries move for every indexed
    /// field whose value changed. Returns `false` if the record is absent.
    pub fn update(&mut self, id: RecordId, fields: Fields) -> Result<bool> {
        self.mutate(|pages, roots, schema| {
            let Some(current) = record::get(&*pages, roots.records_root, id)? else {
                return Ok(false);
            };
            let info = schema.type_info(&current.type_name)?;
            info.check_fields(&fields)?;
            let Some(previous) = record::replace(pages, roots, id, &fields)? else {
                return Ok(false);
            };
            for field in info.indexes() {
                let old = previous.fields.get(field);
                let new = fields.get(field);
                if old == new {
                    continue;
                }
                if let Some(value) = old {
                    index::remove_entry(pages, roots, &previous.type_name, field, value, id)?;
                }
                if let Some(value) = new {
                    index::insert_entry(pages, roots, &previous.type_name, field, value, id)?;
                }
            }
            Ok(true)
        })
    }

    /// Deletes `id` with its extent and index entries. Overflow pages are
    /// released when the transaction commits. Returns `false` if absent.
    pub fn delete(&mut self, id: RecordId) -> Result<bool> {
        self.mutate(|pages, roots, schema| {
            let Some(removed) = record::remove(pages, roots, id)? else {
                return Ok(false);
            };
            let indexed = schema
                .type_info(&removed.type_name)
                .map(|info| info.indexes().to_vec())
                .unwrap_or_default();
            index::unindex_record(pages, roots, &removed, &indexed)?;
            Ok(true)
        })
    }

    /// Drops every record of every type together with all index entries.
    /// Declared indexes stay registered. Returns the number of records
    /// removed.
    pub fn delete_all(&mut self) -> Result<u64> {
        self.mutate(|pages, roots, _| {
            let removed = record::clear(pages, roots)?;
            let entries = index::clear(pages, roots)?;
            info!(records = removed, index_entries = entries, "txn.delete_all");
            Ok(removed)
        })
    }

    /// Deletes every record of `type_name`.
    pub fn delete_all_of(&mut self, type_name: &str) -> Result<u64> {
        self.mutate(|pages, roots, schema| {
            let indexed = schema.type_info(type_name)?.indexes().to_vec();
            let snapshot = *roots;
            let mut ids = Vec::new();
            {
                let mut scan = RecordScan::new(&*pages, &snapshot, type_name);
                while let Some(id) = scan.next_id()? {
                    ids.push(id);
                }
            }
            for &id in &ids {
                if let Some(removed) = record::remove(pages, roots, id)? {
                    index::unindex_record(pages, roots, &removed, &indexed)?;
                }
            }
            debug!(type_name, records = ids.len(), "txn.delete_all_of");
            Ok(ids.len() as u64)
        })
    }

    /// Reads `id` as this transaction sees it.
    pub fn get(&self, id: RecordId) -> Result<Option<Record>> {
        self.ensure_open()?;
        record::get(&self.view(), self.roots.records_root, id)
    }

    /// Lazy scan over the records of `type_name`, own writes included.
    pub fn scan_all(&self, type_name: &str) -> Result<RecordScan<TxnView<'_>>> {
        self.ensure_open()?;
        self.inner.schema.type_info(type_name)?;
        Ok(RecordScan::new(self.view(), &self.roots, type_name))
    }

    /// Ids of `type_name` records whose `field` equals `value`.
    pub fn find_equal(&self, type_name: &str, field: &str, value: &Value) -> Result<Vec<RecordId>> {
        self.find_equal_with(type_name, field, value, QueryStrategy::Auto)
    }

    /// [`find_equal`](Self::find_equal) with an explicit strategy.
    pub fn find_equal_with(
        &self,
        type_name: &str,
        field: &str,
        value: &Value,
        strategy: QueryStrategy,
    ) -> Result<Vec<RecordId>> {
        self.ensure_open()?;
        query::find_equal(
            self.view(),
            &self.roots,
            &self.inner.schema,
            type_name,
            field,
            value,
            strategy,
        )
    }

    /// Number of live records of `type_name`.
    pub fn count(&self, type_name: &str) -> Result<u64> {
        self.ensure_open()?;
        self.inner.schema.type_info(type_name)?;
        record::count(&self.view(), self.roots.extents_root, type_name)
    }

    /// Brings the index tree in line with the declared indexes: catalogued
    /// indexes that are no longer declared (or changed kind) are dropped,
    /// declared ones missing from the catalog are backfilled.
    pub(crate) fn reconcile_indexes(&mut self) -> Result<usize> {
        self.mutate(|pages, roots, schema| {
            let catalog = Catalog::load(&*pages, roots.catalog_root)?;
            let declared = schema.declared_indexes();
            let mut changes = 0;
            for entry in catalog.entries() {
                if declared.contains(entry) {
                    continue;
                }
                let removed = index::drop_index(pages, roots, &entry.type_name, &entry.field)?;
                Catalog::unregister(pages, roots, entry)?;
                info!(
                    type_name = %entry.type_name,
                    field = %entry.field,
                    entries = removed,
                    "store.index.retired"
                );
                changes += 1;
            }
            for entry in &declared {
                if catalog.get(&entry.type_name, &entry.field) == Some(entry) {
                    continue;
                }
                let built = index::backfill(pages, roots, &entry.type_name, &entry.field)?;
                Catalog::register(pages, roots, entry)?;
                info!(
                    type_name = %entry.type_name,
                    field = %entry.field,
                    entries = built,
                    "store.index.built"
                );
                changes += 1;
            }
            Ok(changes)
        })
    }

    /// Publishes every staged change atomically.
    ///
    /// Data pages are written and synced before the commit marker slot is
    /// written and synced. If the marker write or the sync after it fails,
    /// the slot is cleared again. On failure the error is returned and the
    /// transaction stays open, so it can be retried or aborted. Committing
    /// a transaction with no staged change is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.staged.is_empty() && self.roots == self.base {
            self.finish(TxnState::Committed);
            debug!(version = self.base.version.0, "txn.commit.empty");
            return Ok(());
        }
        self.state = TxnState::Committing;
        match self.publish() {
            Ok((version, pages)) => {
                self.finish(TxnState::Committed);
                info!(
                    version = version.0,
                    pages,
                    records = self.roots.record_count,
                    duration_ms = self.started.elapsed().as_millis() as u64,
                    "txn.commit"
                );
                Ok(())
            }
            Err(err) => {
                self.state = TxnState::Open;
                warn!(error = %err, "txn.commit.failed");
                Err(err)
            }
        }
    }

    /// Plans the commit on copies of the staging area so a failure leaves
    /// the transaction untouched, then runs the write protocol.
    fn publish(&mut self) -> Result<(Version, usize)> {
        let pager: &Pager = &self.inner.pager;
        let version = self.base.version.next();
        let mut plan = self.staged.clone();
        let chain = plan.allocator_mut().plan_chain(pager.page_size())?;
        for (id, image) in pager.encode_chain(&chain)? {
            plan.insert_sealed(id, image);
        }
        let (alloc, dirty) = plan.into_parts();
        let (free, next_page) = alloc.finish(version);
        let mut record = self.roots;
        record.version = version;
        record.next_page = next_page;
        record.free_head = chain.first().map(|c| c.page).unwrap_or(PageId::NONE);

        let mut images: Vec<_> = dirty.into_iter().collect();
        debug!(version = version.0, pages = images.len(), "txn.commit.start");
        pager.write_pages(&mut images)?;
        pager.sync()?;
        if let Err(err) = pager
            .write_commit_record(&record)
            .and_then(|()| pager.sync())
        {
            // The slot may already be on disk; clear it so the base
            // snapshot stays the newest valid one.
            if let Err(undo) = pager.retract_commit_record(&record) {
                warn!(version = version.0, error = %undo, "txn.commit.retract_failed");
            }
            return Err(err);
        }
        pager.install(&images);

        let mut committed = self.inner.committed.lock();
        committed.record = record;
        committed.free = free;
        drop(committed);
        self.roots = record;
        Ok((version, images.len()))
    }

    /// Discards every staged change. Always succeeds; a no-op once the
    /// transaction has finished.
    pub fn abort(&mut self) {
        if self.state != TxnState::Open {
            return;
        }
        let pages = self.staged.dirty_len();
        self.finish(TxnState::Aborted);
        debug!(pages, "txn.abort");
    }

    fn finish(&mut self, state: TxnState) {
        self.state = state;
        self.staged = StagedPages::new(PageAllocator::new(
            FreeList::default(),
            self.roots.next_page,
            None,
        ));
        self.writer.take();
    }
}

impl Drop for WriteTxn {
    fn drop(&mut self) {
        if self.state == TxnState::Open {
            debug!("txn.abort.drop");
            self.abort();
        }
    }
}

/// A pinned, read-only snapshot.
///
/// Readers never block and never observe later commits. Pages the snapshot
/// references are not reused while it is alive.
pub struct ReadTxn {
    inner: Arc<StoreInner>,
    record: CommitRecord,
    guard: ReaderGuard,
}

impl ReadTxn {
    pub(crate) fn begin(inner: Arc<StoreInner>) -> Self {
        let (record, guard) = {
            let committed = inner.committed.lock();
            let guard = inner.locks.pin_reader(committed.record.version);
            (committed.record, guard)
        };
        Self {
            inner,
            record,
            guard,
        }
    }

    /// Version of the pinned snapshot.
    pub fn version(&self) -> Version {
        self.guard.version()
    }

    /// Number of live records in the snapshot.
    pub fn record_count(&self) -> u64 {
        self.record.record_count
    }

    /// Number of index entries in the snapshot.
    pub fn index_entries(&self) -> u64 {
        self.record.index_entries
    }

    pub(crate) fn commit_record(&self) -> &CommitRecord {
        &self.record
    }

    pub(crate) fn pages(&self) -> &Pager {
        &self.inner.pager
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Reads `id`.
    pub fn get(&self, id: RecordId) -> Result<Option<Record>> {
        record::get(self.pages(), self.record.records_root, id)
    }

    /// Lazy, restartable scan over the records of `type_name`.
    pub fn scan_all(&self, type_name: &str) -> Result<RecordScan<&Pager>> {
        self.inner.schema.type_info(type_name)?;
        Ok(RecordScan::new(self.pages(), &self.record, type_name))
    }

    /// Ids of `type_name` records whose `field` equals `value`.
    pub fn find_equal(&self, type_name: &str, field: &str, value: &Value) -> Result<Vec<RecordId>> {
        self.find_equal_with(type_name, field, value, QueryStrategy::Auto)
    }

    /// [`find_equal`](Self::find_equal) with an explicit strategy.
    pub fn find_equal_with(
        &self,
        type_name: &str,
        field: &str,
        value: &Value,
        strategy: QueryStrategy,
    ) -> Result<Vec<RecordId>> {
        query::find_equal(
            self.pages(),
            &self.record,
            &self.inner.schema,
            type_name,
            field,
            value,
            strategy,
        )
    }

    /// Plan `find_equal` would use for `type_name.field`.
    pub fn explain(&self, type_name: &str, field: &str) -> Result<QueryPlan> {
        query::plan(&self.inner.schema, type_name, field, QueryStrategy::Auto)
    }

    /// Number of live records of `type_name`.
    pub fn count(&self, type_name: &str) -> Result<u64> {
        self.inner.schema.type_info(type_name)?;
        record::count(self.pages(), self.record.extents_root, type_name)
    }
}
