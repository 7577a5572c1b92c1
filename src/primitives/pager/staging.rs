use std::collections::HashMap;
use std::sync::Arc;

use super::freelist::PageAllocator;
use super::pager::Pager;
use super::{PageSink, PageSource};
use crate::types::{page::PageKind, PageId, Result};

/// Page images and allocator state private to one write transaction.
#[derive(Clone, Debug)]
pub struct StagedPages {
    alloc: PageAllocator,
    dirty: HashMap<PageId, Arc<[u8]>>,
    journal: Option<Vec<(PageId, Option<Arc<[u8]>>)>>,
}

impl StagedPages {
    /// Starts an empty staging area over `alloc`.
    pub fn new(alloc: PageAllocator) -> Self {
        Self {
            alloc,
            dirty: HashMap::new(),
            journal: None,
        }
    }

    /// Marks the current state so a failed operation can be undone.
    pub fn savepoint(&mut self) {
        self.alloc.savepoint();
        self.journal = Some(Vec::new());
    }

    /// Accepts every change made since the savepoint.
    pub fn release(&mut self) {
        self.alloc.release();
        self.journal = None;
    }

    /// Restores images and allocator state to the savepoint.
    pub fn rollback(&mut self) {
        self.alloc.rollback();
        let Some(journal) = self.journal.take() else {
            return;
        };
        for (id, previous) in journal.into_iter().rev() {
            match previous {
                Some(image) => self.dirty.insert(id, image),
                None => self.dirty.remove(&id),
            };
        }
    }

    fn stage(&mut self, id: PageId, image: Option<Arc<[u8]>>) {
        let previous = match image {
            Some(image) => self.dirty.insert(id, image),
            None => self.dirty.remove(&id),
        };
        if let Some(journal) = self.journal.as_mut() {
            journal.push((id, previous));
        }
    }

    /// Transaction-local allocator.
    pub fn allocator(&self) -> &PageAllocator {
        &self.alloc
    }

    /// Mutable access to the allocator, used while planning a commit.
    pub fn allocator_mut(&mut self) -> &mut PageAllocator {
        &mut self.alloc
    }

    /// True if nothing has been staged, allocated or freed.
    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty() && !self.alloc.is_dirty()
    }

    /// Number of staged page images.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Adds an already sealed image (used for free-list chain pages).
    pub fn insert_sealed(&mut self, id: PageId, image: Arc<[u8]>) {
        self.stage(id, Some(image));
    }

    /// Splits into allocator and images once the commit has been planned.
    pub fn into_parts(self) -> (PageAllocator, HashMap<PageId, Arc<[u8]>>) {
        (self.alloc, self.dirty)
    }

    fn load_staged(&self, id: PageId) -> Option<Arc<[u8]>> {
        self.dirty.get(&id).cloned()
    }
}

/// Mutable page view of a write transaction: staged images over the pager.
pub struct TxnPages<'a> {
    pager: &'a Pager,
    staged: &'a mut StagedPages,
}

impl<'a> TxnPages<'a> {
    /// Wraps the staging area of a write transaction.
    pub fn new(pager: &'a Pager, staged: &'a mut StagedPages) -> Self {
        Self { pager, staged }
    }
}

/// Read-only page view of a write transaction.
pub struct TxnView<'a> {
    pager: &'a Pager,
    staged: &'a StagedPages,
}

impl<'a> TxnView<'a> {
    /// Wraps the staging area of a write transaction for reads.
    pub fn new(pager: &'a Pager, staged: &'a StagedPages) -> Self {
        Self { pager, staged }
    }
}

impl PageSource for TxnView<'_> {
    fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    fn load(&self, id: PageId) -> Result<Arc<[u8]>> {
        match self.staged.load_staged(id) {
            Some(image) => Ok(image),
            None => self.pager.load(id),
        }
    }
}

impl PageSource for TxnPages<'_> {
    fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    fn load(&self, id: PageId) -> Result<Arc<[u8]>> {
        match self.staged.load_staged(id) {
            Some(image) => Ok(image),
            None => self.pager.load(id),
        }
    }
}

impl PageSink for TxnPages<'_> {
    fn allocate(&mut self) -> Result<PageId> {
        let id = self.staged.alloc.allocate()?;
        let zeroed: Arc<[u8]> = Arc::from(vec![0u8; self.pager.page_size()]);
        self.staged.stage(id, Some(zeroed));
        Ok(id)
    }

    fn write(&mut self, id: PageId, kind: PageKind, mut image: Vec<u8>) -> Result<()> {
        self.pager.seal(id, kind, &mut image)?;
        self.staged.stage(id, Some(Arc::from(image)));
        Ok(())
    }

    fn free(&mut self, id: PageId) -> Result<()> {
        self.staged.stage(id, None);
        self.staged.alloc.free(id);
        Ok(())
    }

    fn is_fresh(&self, id: PageId) -> bool {
        self.staged.alloc.is_fresh(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::{FileIo, StdFileIo};
    use crate::primitives::pager::PagerOptions;
    use crate::types::page::PAGE_HDR_LEN;
    use tempfile::tempdir;

    #[test]
    fn staged_images_shadow_the_pager() {
        let dir = tempdir().unwrap();
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.path().join("s.db")).unwrap());
        let options = PagerOptions {
            page_size: 1024,
            ..PagerOptions::default()
        };
        let (pager, record, free) = Pager::open(io, options).unwrap();
        let mut staged = StagedPages::new(PageAllocator::new(free, record.next_page, None));
        assert!(staged.is_empty());

        let id = {
            let mut pages = TxnPages::new(&pager, &mut staged);
            let id = pages.allocate().unwrap();
            assert!(pages.load(id).unwrap().iter().all(|&b| b == 0));
            let mut image = vec![0u8; 1024];
            image[PAGE_HDR_LEN] = 42;
            pages.write(id, PageKind::Overflow, image).unwrap();
            assert!(pages.is_fresh(id));
            id
        };
        let view = TxnView::new(&pager, &staged);
        assert_eq!(view.load(id).unwrap()[PAGE_HDR_LEN], 42);
        assert!(pager.load(id).is_err(), "nothing reached the file yet");
        assert_eq!(staged.dirty_len(), 1);

        let mut pages = TxnPages::new(&pager, &mut staged);
        pages.free(id).unwrap();
        assert_eq!(staged.dirty_len(), 0);
        assert_eq!(staged.allocator().reclaimable_count(), 1);
    }

    #[test]
    fn rollback_discards_work_after_savepoint() {
        let dir = tempdir().unwrap();
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.path().join("r.db")).unwrap());
        let options = PagerOptions {
            page_size: 1024,
            ..PagerOptions::default()
        };
        let (pager, record, free) = Pager::open(io, options).unwrap();
        let mut staged = StagedPages::new(PageAllocator::new(free, record.next_page, None));
        let first = TxnPages::new(&pager, &mut staged).allocate().unwrap();

        staged.savepoint();
        {
            let mut pages = TxnPages::new(&pager, &mut staged);
            pages.allocate().unwrap();
            pages.free(first).unwrap();
        }
        staged.rollback();

        assert_eq!(staged.dirty_len(), 1);
        assert!(staged.allocator().is_fresh(first));
        assert_eq!(staged.allocator().next_page(), PageId(first.0 + 1));
    }
}
