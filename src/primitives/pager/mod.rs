#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::types::{page::PageKind, PageId, Result};

mod freelist;
mod meta;
mod pager;
mod staging;

pub use freelist::{free_page_capacity, ChainPage, FreeList, PageAllocator};
pub use meta::{CommitRecord, FileHeader, FIRST_DATA_PAGE, HEADER_PAGE, MARKER_PAGE};
pub use pager::{Pager, PagerOptions, PagerStats, Synchronous};
pub use staging::{StagedPages, TxnPages, TxnView};

/// Read access to page images.
pub trait PageSource {
    /// Page size in bytes.
    fn page_size(&self) -> usize;
    /// Returns the full image (header included) of page `id`.
    fn load(&self, id: PageId) -> Result<Arc<[u8]>>;
}

impl<T: PageSource + ?Sized> PageSource for &T {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn load(&self, id: PageId) -> Result<Arc<[u8]>> {
        (**self).load(id)
    }
}

/// Write access used by structures that stage copy-on-write page updates.
pub trait PageSink: PageSource {
    /// Allocates a page; it reads back as zeroes until written.
    fn allocate(&mut self) -> Result<PageId>;
    /// Stages a full page image; the header and checksum are filled in here.
    fn write(&mut self, id: PageId, kind: PageKind, image: Vec<u8>) -> Result<()>;
    /// Releases a page.
    fn free(&mut self, id: PageId) -> Result<()>;
    /// True if the page was allocated by the current transaction and may be
    /// rewritten in place.
    fn is_fresh(&self, id: PageId) -> bool;
}
