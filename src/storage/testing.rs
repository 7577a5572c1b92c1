//! Scratch pager fixtures for storage unit tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::primitives::pager::{CommitRecord, PageAllocator, Pager, PagerOptions, StagedPages};

pub(crate) struct Scratch {
    _dir: TempDir,
    pub pager: Pager,
    pub staged: StagedPages,
    pub roots: CommitRecord,
}

pub(crate) fn scratch(page_size: u32) -> Scratch {
    let dir = tempfile::tempdir().unwrap();
    let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.path().join("scratch.db")).unwrap());
    let options = PagerOptions {
        page_size,
        ..PagerOptions::default()
    };
    let (pager, roots, free) = Pager::open(io, options).unwrap();
    let staged = StagedPages::new(PageAllocator::new(free, roots.next_page, None));
    Scratch {
        _dir: dir,
        pager,
        staged,
        roots,
    }
}
