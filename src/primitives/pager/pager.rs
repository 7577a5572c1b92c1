use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::freelist::{read_free_page, write_free_page, ChainPage, FreeList};
use super::meta::{
    clear_commit_record, create_file, load_commit_record, load_header, write_commit_record,
    CommitRecord, FileHeader,
};
use super::PageSource;
use crate::primitives::io::FileIo;
use crate::types::{
    checksum::{seal_page, verify_page},
    page::{self, PageHeader, PageKind, PAGE_HDR_LEN},
    PageId, PenumbraError, Result,
};

const DEFAULT_CACHE_PAGES: usize = 1024;

/// Configuration options for the pager.
#[derive(Clone, Debug)]
pub struct PagerOptions {
    /// Size of each page in bytes; only used when creating a file.
    pub page_size: u32,
    /// Number of committed page images kept in memory.
    pub cache_pages: usize,
    /// Durability mode for commit barriers.
    pub synchronous: Synchronous,
    /// Upper bound on the number of pages in the file.
    pub max_pages: Option<u64>,
    /// Verify header and checksum of every page read from disk.
    pub verify_checksums: bool,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            page_size: page::DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            synchronous: Synchronous::Full,
            max_pages: None,
            verify_checksums: true,
        }
    }
}

/// Durability mode for commit barriers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    /// fsync after data pages and again after the commit marker.
    #[default]
    Full,
    /// No explicit syncs (fastest, survives process crashes only).
    Off,
}

impl Synchronous {
    /// Returns the string representation of the synchronous mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Synchronous::Full => "full",
            Synchronous::Off => "off",
        }
    }

    /// Parses a synchronous mode from a string (case-insensitive).
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Some(Synchronous::Full),
            "off" => Some(Synchronous::Off),
            _ => None,
        }
    }
}

/// Statistics tracking pager operations.
#[derive(Default, Clone, Debug, serde::Serialize)]
pub struct PagerStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (page reads from disk).
    pub misses: u64,
    /// Number of pages written.
    pub page_writes: u64,
    /// Number of fsync calls issued.
    pub syncs: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    page_writes: AtomicU64,
    syncs: AtomicU64,
}

/// Owns the store file: page reads through an LRU cache, sealed page writes,
/// sync barriers and commit-marker updates.
pub struct Pager {
    io: Arc<dyn FileIo>,
    header: FileHeader,
    options: PagerOptions,
    cache: Mutex<LruCache<PageId, Arc<[u8]>>>,
    counters: Counters,
}

impl Pager {
    /// Opens (or initializes) the file behind `io`.
    ///
    /// Returns the pager together with the newest committed record and the
    /// free list it references.
    pub fn open(
        io: Arc<dyn FileIo>,
        options: PagerOptions,
    ) -> Result<(Self, CommitRecord, FreeList)> {
        let (header, record) = if io.is_empty()? {
            let (header, record) = create_file(io.as_ref(), options.page_size)?;
            info!(page_size = header.page_size, "pager.create");
            (header, record)
        } else {
            let header = load_header(io.as_ref())?;
            if header.page_size != options.page_size {
                warn!(
                    stored = header.page_size,
                    requested = options.page_size,
                    "pager.open.page_size_override"
                );
            }
            let record = load_commit_record(io.as_ref(), &header)?;
            // pages past the high-water mark belong to commits that never published
            let used = record.next_page.0 * u64::from(header.page_size);
            let len = io.len()?;
            if len > used {
                io.truncate(used)?;
                debug!(from = len, to = used, "pager.open.trim_tail");
            }
            info!(
                version = record.version.0,
                next_page = record.next_page.0,
                "pager.open"
            );
            (header, record)
        };
        let capacity = NonZeroUsize::new(options.cache_pages.max(1)).unwrap_or(NonZeroUsize::MIN);
        let pager = Self {
            io,
            header,
            options,
            cache: Mutex::new(LruCache::new(capacity)),
            counters: Counters::default(),
        };
        let free = pager.load_free_list(record.free_head)?;
        debug!(
            free_pages = free.reclaimable_count(),
            chain_pages = free.chain().len(),
            "pager.open.free_list"
        );
        Ok((pager, record, free))
    }

    fn load_free_list(&self, head: PageId) -> Result<FreeList> {
        let mut pages = Vec::new();
        let mut chain = Vec::new();
        let mut cursor = head;
        while !cursor.is_none() {
            if chain.contains(&cursor) {
                return Err(PenumbraError::Corruption("free list chain loops"));
            }
            let image = self.load(cursor)?;
            let header = PageHeader::decode(&image)?;
            if header.kind != PageKind::FreeList {
                return Err(PenumbraError::Corruption("free list page kind mismatch"));
            }
            let (next, entries) = read_free_page(&image)?;
            chain.push(cursor);
            pages.extend(entries);
            cursor = next;
        }
        Ok(FreeList::from_loaded(pages, chain))
    }

    /// File-level header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Options the pager was opened with.
    pub fn options(&self) -> &PagerOptions {
        &self.options
    }

    /// Encodes `kind`'s page header into `image` and seals its checksum.
    pub fn seal(&self, id: PageId, kind: PageKind, image: &mut [u8]) -> Result<()> {
        if image.len() != self.header.page_size as usize {
            return Err(PenumbraError::Invalid("page image size mismatch"));
        }
        PageHeader::new(id, kind, self.header.page_size, self.header.salt)?
            .encode(&mut image[..PAGE_HDR_LEN])?;
        seal_page(image, id, self.header.salt)
    }

    /// Builds sealed images for a planned free-list chain.
    pub fn encode_chain(&self, chain: &[ChainPage]) -> Result<Vec<(PageId, Arc<[u8]>)>> {
        chain
            .iter()
            .map(|chain_page| {
                let mut image = vec![0u8; self.header.page_size as usize];
                write_free_page(&mut image, chain_page)?;
                self.seal(chain_page.page, PageKind::FreeList, &mut image)?;
                Ok((chain_page.page, Arc::<[u8]>::from(image)))
            })
            .collect()
    }

    /// Writes sealed page images in ascending page order.
    pub fn write_pages(&self, pages: &mut [(PageId, Arc<[u8]>)]) -> Result<()> {
        pages.sort_unstable_by_key(|(id, _)| *id);
        for (id, image) in pages.iter() {
            if *id == super::HEADER_PAGE || *id == super::MARKER_PAGE {
                return Err(PenumbraError::Invalid("data write aimed at a reserved page"));
            }
            self.io.write_at(self.offset(*id), image)?;
            self.counters.page_writes.fetch_add(1, AtomicOrdering::Relaxed);
        }
        Ok(())
    }

    /// Sync barrier; a no-op under `Synchronous::Off`.
    pub fn sync(&self) -> Result<()> {
        if self.options.synchronous == Synchronous::Off {
            return Ok(());
        }
        self.io.sync_all()?;
        self.counters.syncs.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    /// Writes the marker slot for `record`. This is the durability boundary.
    pub fn write_commit_record(&self, record: &CommitRecord) -> Result<()> {
        write_commit_record(self.io.as_ref(), &self.header, record)
    }

    /// Takes back a marker slot whose commit did not complete, then syncs.
    pub fn retract_commit_record(&self, record: &CommitRecord) -> Result<()> {
        clear_commit_record(self.io.as_ref(), &self.header, record)?;
        self.sync()
    }

    /// Publishes freshly committed page images to the cache.
    pub fn install(&self, pages: &[(PageId, Arc<[u8]>)]) {
        let mut cache = self.cache.lock();
        for (id, image) in pages {
            cache.put(*id, image.clone());
        }
    }

    /// Current size of the backing file in bytes.
    pub fn file_len(&self) -> Result<u64> {
        self.io.len()
    }

    /// Returns a snapshot of pager counters.
    pub fn stats(&self) -> PagerStats {
        PagerStats {
            hits: self.counters.hits.load(AtomicOrdering::Relaxed),
            misses: self.counters.misses.load(AtomicOrdering::Relaxed),
            page_writes: self.counters.page_writes.load(AtomicOrdering::Relaxed),
            syncs: self.counters.syncs.load(AtomicOrdering::Relaxed),
        }
    }

    fn offset(&self, id: PageId) -> u64 {
        id.0 * self.header.page_size as u64
    }
}

impl PageSource for Pager {
    fn page_size(&self) -> usize {
        self.header.page_size as usize
    }

    fn load(&self, id: PageId) -> Result<Arc<[u8]>> {
        if id.is_none() {
            return Err(PenumbraError::Corruption("dereferenced the null page"));
        }
        if let Some(image) = self.cache.lock().get(&id) {
            self.counters.hits.fetch_add(1, AtomicOrdering::Relaxed);
            return Ok(image.clone());
        }
        self.counters.misses.fetch_add(1, AtomicOrdering::Relaxed);
        let mut buf = vec![0u8; self.header.page_size as usize];
        self.io.read_at(self.offset(id), &mut buf)?;
        if self.options.verify_checksums {
            verify_page(&buf, id, self.header.salt, self.header.page_size)?;
        }
        let image: Arc<[u8]> = Arc::from(buf);
        self.cache.lock().put(id, image.clone());
        Ok(image)
    }
}

impl fmt::Display for PagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} page_writes={} syncs={}",
            self.hits, self.misses, self.page_writes, self.syncs
        )
    }
}
