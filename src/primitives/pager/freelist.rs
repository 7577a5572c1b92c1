use std::collections::{BTreeSet, HashSet};

use crate::types::{page::PAGE_HDR_LEN, PageId, PenumbraError, Result, Version};

const FREE_NEXT: usize = PAGE_HDR_LEN;
const FREE_COUNT: usize = PAGE_HDR_LEN + 8;
const FREE_ENTRIES: usize = PAGE_HDR_LEN + 16;
const FREE_ENTRY_LEN: usize = 8;

/// A page released by a committed transaction, waiting for readers to drain.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct RetiredPage {
    page: PageId,
    freed_at: Version,
}

/// Committed free-space state.
///
/// `reusable` pages are unreferenced by every pinned snapshot. `retired`
/// pages were released by the commit that produced `freed_at` and may still
/// be visible to readers pinned to an older version.
#[derive(Clone, Debug, Default)]
pub struct FreeList {
    reusable: BTreeSet<PageId>,
    retired: Vec<RetiredPage>,
    chain: Vec<PageId>,
}

impl FreeList {
    /// Builds the state loaded from disk: with no readers alive every listed
    /// page is reusable.
    pub fn from_loaded(pages: Vec<PageId>, chain: Vec<PageId>) -> Self {
        Self {
            reusable: pages.into_iter().collect(),
            retired: Vec::new(),
            chain,
        }
    }

    /// Moves retired pages no pinned reader can reach into the reusable pool.
    pub fn reclaim(&mut self, oldest_reader: Option<Version>) -> usize {
        let before = self.retired.len();
        let reusable = &mut self.reusable;
        self.retired.retain(|retired| {
            let visible = oldest_reader.is_some_and(|oldest| oldest < retired.freed_at);
            if !visible {
                reusable.insert(retired.page);
            }
            visible
        });
        before - self.retired.len()
    }

    /// Pages that can be handed out immediately.
    pub fn reclaimable_count(&self) -> usize {
        self.reusable.len()
    }

    /// Pages released but still possibly referenced by a reader.
    pub fn pending_count(&self) -> usize {
        self.retired.len()
    }

    /// Pages currently holding the persisted free-list chain.
    pub fn chain(&self) -> &[PageId] {
        &self.chain
    }

    /// Every page tracked as free, in ascending order.
    pub fn pages(&self) -> Vec<PageId> {
        let mut out: Vec<PageId> = self.reusable.iter().copied().collect();
        out.extend(self.retired.iter().map(|r| r.page));
        out.sort_unstable();
        out
    }
}

/// Transaction-local allocator working on a copy of the committed free list.
///
/// Pages allocated here are "fresh": no snapshot references them, so they
/// may be rewritten in place and, if freed again, return straight to the
/// pool. Committed pages that are freed are only retired when the
/// transaction commits.
#[derive(Clone, Debug)]
pub struct PageAllocator {
    free: FreeList,
    next_page: PageId,
    limit: Option<u64>,
    fresh: HashSet<PageId>,
    freed: Vec<PageId>,
    journal: Option<Vec<AllocUndo>>,
}

/// Inverse of one allocator step, replayed newest first on rollback.
#[derive(Clone, Copy, Debug)]
enum AllocUndo {
    Reused(PageId),
    Grew(PageId),
    FreedFresh(PageId),
    FreedCommitted,
}

/// One page of a free-list chain ready to be encoded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainPage {
    /// Page the entries are written to.
    pub page: PageId,
    /// Next page in the chain, or `PageId::NONE`.
    pub next: PageId,
    /// Free pages listed on this chain page.
    pub entries: Vec<PageId>,
}

impl PageAllocator {
    /// Starts a transaction-local allocator.
    pub fn new(free: FreeList, next_page: PageId, limit: Option<u64>) -> Self {
        Self {
            free,
            next_page,
            limit,
            fresh: HashSet::new(),
            freed: Vec::new(),
            journal: None,
        }
    }

    /// Starts recording steps so they can be undone with [`Self::rollback`].
    pub fn savepoint(&mut self) {
        self.journal = Some(Vec::new());
    }

    /// Keeps every step since the savepoint.
    pub fn release(&mut self) {
        self.journal = None;
    }

    /// Undoes every step since the savepoint.
    pub fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for step in journal.into_iter().rev() {
            match step {
                AllocUndo::Reused(page) => {
                    self.fresh.remove(&page);
                    self.free.reusable.insert(page);
                }
                AllocUndo::Grew(page) => {
                    self.fresh.remove(&page);
                    self.next_page = page;
                }
                AllocUndo::FreedFresh(page) => {
                    self.free.reusable.remove(&page);
                    self.fresh.insert(page);
                }
                AllocUndo::FreedCommitted => {
                    self.freed.pop();
                }
            }
        }
    }

    fn record(&mut self, step: AllocUndo) {
        if let Some(journal) = self.journal.as_mut() {
            journal.push(step);
        }
    }

    /// Returns an unused page id, preferring the lowest reusable page.
    pub fn allocate(&mut self) -> Result<PageId> {
        let page = match self.free.reusable.pop_first() {
            Some(page) => {
                self.record(AllocUndo::Reused(page));
                page
            }
            None => {
                if let Some(limit) = self.limit {
                    if self.next_page.0 >= limit {
                        return Err(PenumbraError::OutOfSpace { limit });
                    }
                }
                let page = self.next_page;
                self.next_page = PageId(page.0 + 1);
                self.record(AllocUndo::Grew(page));
                page
            }
        };
        self.fresh.insert(page);
        Ok(page)
    }

    /// Releases a page. Fresh pages are immediately reusable; committed
    /// pages are held back until the transaction commits.
    pub fn free(&mut self, page: PageId) {
        if self.fresh.remove(&page) {
            self.free.reusable.insert(page);
            self.record(AllocUndo::FreedFresh(page));
        } else {
            self.freed.push(page);
            self.record(AllocUndo::FreedCommitted);
        }
    }

    /// True if `page` was allocated by this transaction.
    pub fn is_fresh(&self, page: PageId) -> bool {
        self.fresh.contains(&page)
    }

    /// True if anything was allocated or freed.
    pub fn is_dirty(&self) -> bool {
        !self.fresh.is_empty() || !self.freed.is_empty()
    }

    /// Pages that can be handed out without growing the file.
    pub fn reclaimable_count(&self) -> usize {
        self.free.reclaimable_count()
    }

    /// Pages released but not yet reusable (including this transaction's).
    pub fn pending_count(&self) -> usize {
        self.free.pending_count() + self.freed.len()
    }

    /// First page id past the allocated region.
    pub fn next_page(&self) -> PageId {
        self.next_page
    }

    /// Plans the persisted chain for the post-commit free set.
    ///
    /// The previous chain pages are released (they belong to the committed
    /// snapshot) and new chain pages are allocated from this allocator.
    pub fn plan_chain(&mut self, page_size: usize) -> Result<Vec<ChainPage>> {
        let old_chain = std::mem::take(&mut self.free.chain);
        for page in old_chain {
            self.free(page);
        }
        let capacity = free_page_capacity(page_size);
        let mut chain = Vec::new();
        loop {
            let total = self.free.reusable.len() + self.free.retired.len() + self.freed.len();
            if chain.len() >= total.div_ceil(capacity) {
                break;
            }
            chain.push(self.allocate()?);
        }
        let mut entries: Vec<PageId> = self.free.pages();
        entries.extend(self.freed.iter().copied());
        entries.sort_unstable();
        let mut planned = Vec::with_capacity(chain.len());
        let mut chunks = entries.chunks(capacity);
        for (idx, &page) in chain.iter().enumerate() {
            let next = chain.get(idx + 1).copied().unwrap_or(PageId::NONE);
            let entries = chunks.next().map(<[PageId]>::to_vec).unwrap_or_default();
            planned.push(ChainPage {
                page,
                next,
                entries,
            });
        }
        self.free.chain = chain;
        Ok(planned)
    }

    /// Consumes the allocator, retiring this transaction's freed pages at
    /// `version`. Returns the new committed free list and next page id.
    pub fn finish(mut self, version: Version) -> (FreeList, PageId) {
        for page in self.freed.drain(..) {
            self.free.retired.push(RetiredPage {
                page,
                freed_at: version,
            });
        }
        (self.free, self.next_page)
    }
}

/// Number of page ids a free-list page can hold.
pub fn free_page_capacity(page_size: usize) -> usize {
    page_size.saturating_sub(FREE_ENTRIES) / FREE_ENTRY_LEN
}

/// Encodes a chain page's body (the page header is sealed by the pager).
pub fn write_free_page(buf: &mut [u8], chain_page: &ChainPage) -> Result<()> {
    let capacity = free_page_capacity(buf.len());
    if chain_page.entries.len() > capacity {
        return Err(PenumbraError::Invalid("free page entries exceed capacity"));
    }
    buf[PAGE_HDR_LEN..].fill(0);
    buf[FREE_NEXT..FREE_NEXT + 8].copy_from_slice(&chain_page.next.0.to_be_bytes());
    buf[FREE_COUNT..FREE_COUNT + 4]
        .copy_from_slice(&(chain_page.entries.len() as u32).to_be_bytes());
    for (idx, page) in chain_page.entries.iter().enumerate() {
        let off = FREE_ENTRIES + idx * FREE_ENTRY_LEN;
        buf[off..off + FREE_ENTRY_LEN].copy_from_slice(&page.0.to_be_bytes());
    }
    Ok(())
}

/// Decodes a chain page, returning the next pointer and the listed pages.
pub fn read_free_page(buf: &[u8]) -> Result<(PageId, Vec<PageId>)> {
    if buf.len() < FREE_ENTRIES {
        return Err(PenumbraError::Corruption("free page truncated"));
    }
    let word = |off: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[off..off + 8]);
        u64::from_be_bytes(bytes)
    };
    let next = PageId(word(FREE_NEXT));
    let mut count_bytes = [0u8; 4];
    count_bytes.copy_from_slice(&buf[FREE_COUNT..FREE_COUNT + 4]);
    let count = u32::from_be_bytes(count_bytes) as usize;
    if count > free_page_capacity(buf.len()) {
        return Err(PenumbraError::Corruption("free page count exceeds capacity"));
    }
    let pages = (0..count)
        .map(|idx| PageId(word(FREE_ENTRIES + idx * FREE_ENTRY_LEN)))
        .collect();
    Ok((next, pages))
}
