use crate::primitives::io::FileIo;
use crate::types::{
    checksum::{crc32, seal_page, verify_page},
    page::{self, PageHeader, PageKind, PAGE_HDR_LEN},
    PageId, PenumbraError, RecordId, Result, Version,
};
use rand::{rngs::OsRng, RngCore};
use std::convert::TryInto;
use std::io::ErrorKind;
use std::ops::Range;
use tracing::warn;

/// Page holding the immutable file header.
pub const HEADER_PAGE: PageId = PageId(0);
/// Page holding the two commit-marker slots.
pub const MARKER_PAGE: PageId = PageId(1);
/// First page id available for data.
pub const FIRST_DATA_PAGE: PageId = PageId(2);

const HEADER_SALT: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 8;
const HEADER_PAGE_SIZE: Range<usize> = PAGE_HDR_LEN + 8..PAGE_HDR_LEN + 12;
const HEADER_FORMAT_VERSION: Range<usize> = PAGE_HDR_LEN + 12..PAGE_HDR_LEN + 14;
const HEADER_RESERVED: Range<usize> = PAGE_HDR_LEN + 14..PAGE_HDR_LEN + 16;

/// Size in bytes of one commit-marker slot.
pub const SLOT_LEN: usize = 128;
const SLOT_COUNT: usize = 2;

const SLOT_VERSION: Range<usize> = 0..8;
const SLOT_RECORDS_ROOT: Range<usize> = 8..16;
const SLOT_EXTENTS_ROOT: Range<usize> = 16..24;
const SLOT_INDEX_ROOT: Range<usize> = 24..32;
const SLOT_CATALOG_ROOT: Range<usize> = 32..40;
const SLOT_FREE_HEAD: Range<usize> = 40..48;
const SLOT_NEXT_PAGE: Range<usize> = 48..56;
const SLOT_NEXT_RECORD_ID: Range<usize> = 56..64;
const SLOT_RECORD_COUNT: Range<usize> = 64..72;
const SLOT_INDEX_ENTRIES: Range<usize> = 72..80;
const SLOT_CRC32: Range<usize> = SLOT_LEN - 4..SLOT_LEN;

/// Immutable file-level metadata stored in page 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Random salt mixed into every page checksum.
    pub salt: u64,
    /// On-disk format version.
    pub format_version: u16,
}

/// Contents of a commit-marker slot: everything needed to open a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitRecord {
    /// Snapshot version this record describes.
    pub version: Version,
    /// Root of the record table (`RecordId` → body).
    pub records_root: PageId,
    /// Root of the per-type extent table (`type, RecordId` → ()).
    pub extents_root: PageId,
    /// Root of the secondary index tree.
    pub index_root: PageId,
    /// Root of the index catalog tree.
    pub catalog_root: PageId,
    /// First page of the persisted free-list chain.
    pub free_head: PageId,
    /// First page id past the end of the allocated region.
    pub next_page: PageId,
    /// Identifier handed to the next inserted record.
    pub next_record_id: RecordId,
    /// Number of live records.
    pub record_count: u64,
    /// Number of live index entries.
    pub index_entries: u64,
}

impl CommitRecord {
    /// The record describing a freshly created, empty store.
    pub fn initial() -> Self {
        Self {
            version: Version(0),
            records_root: PageId::NONE,
            extents_root: PageId::NONE,
            index_root: PageId::NONE,
            catalog_root: PageId::NONE,
            free_head: PageId::NONE,
            next_page: FIRST_DATA_PAGE,
            next_record_id: RecordId(1),
            record_count: 0,
            index_entries: 0,
        }
    }

    fn encode(&self, dst: &mut [u8]) {
        dst[..SLOT_LEN].fill(0);
        dst[SLOT_VERSION].copy_from_slice(&self.version.0.to_be_bytes());
        dst[SLOT_RECORDS_ROOT].copy_from_slice(&self.records_root.0.to_be_bytes());
        dst[SLOT_EXTENTS_ROOT].copy_from_slice(&self.extents_root.0.to_be_bytes());
        dst[SLOT_INDEX_ROOT].copy_from_slice(&self.index_root.0.to_be_bytes());
        dst[SLOT_CATALOG_ROOT].copy_from_slice(&self.catalog_root.0.to_be_bytes());
        dst[SLOT_FREE_HEAD].copy_from_slice(&self.free_head.0.to_be_bytes());
        dst[SLOT_NEXT_PAGE].copy_from_slice(&self.next_page.0.to_be_bytes());
        dst[SLOT_NEXT_RECORD_ID].copy_from_slice(&self.next_record_id.0.to_be_bytes());
        dst[SLOT_RECORD_COUNT].copy_from_slice(&self.record_count.to_be_bytes());
        dst[SLOT_INDEX_ENTRIES].copy_from_slice(&self.index_entries.to_be_bytes());
        let crc = crc32(&dst[..SLOT_CRC32.start]);
        dst[SLOT_CRC32].copy_from_slice(&crc.to_be_bytes());
    }

    fn decode(src: &[u8]) -> Option<Self> {
        let src = src.get(..SLOT_LEN)?;
        let stored = u32::from_be_bytes(src[SLOT_CRC32].try_into().ok()?);
        if crc32(&src[..SLOT_CRC32.start]) != stored {
            return None;
        }
        let field = |range: Range<usize>| -> Option<u64> {
            Some(u64::from_be_bytes(src[range].try_into().ok()?))
        };
        Some(Self {
            version: Version(field(SLOT_VERSION)?),
            records_root: PageId(field(SLOT_RECORDS_ROOT)?),
            extents_root: PageId(field(SLOT_EXTENTS_ROOT)?),
            index_root: PageId(field(SLOT_INDEX_ROOT)?),
            catalog_root: PageId(field(SLOT_CATALOG_ROOT)?),
            free_head: PageId(field(SLOT_FREE_HEAD)?),
            next_page: PageId(field(SLOT_NEXT_PAGE)?),
            next_record_id: RecordId(field(SLOT_NEXT_RECORD_ID)?),
            record_count: field(SLOT_RECORD_COUNT)?,
            index_entries: field(SLOT_INDEX_ENTRIES)?,
        })
    }

    /// Marker slot this record is written to; alternates between commits.
    pub fn slot(&self) -> usize {
        (self.version.0 % SLOT_COUNT as u64) as usize
    }
}

fn page_offset(id: PageId, page_size: u32) -> u64 {
    id.0 * page_size as u64
}

fn slot_offset(slot: usize, page_size: u32) -> u64 {
    page_offset(MARKER_PAGE, page_size) + (PAGE_HDR_LEN + slot * SLOT_LEN) as u64
}

/// Initializes a new store file: header page plus a marker page whose first
/// slot holds the empty snapshot. Both pages are synced before returning.
pub fn create_file(io: &dyn FileIo, page_size: u32) -> Result<(FileHeader, CommitRecord)> {
    if !page::is_valid_page_size(page_size) {
        return Err(PenumbraError::Invalid("unsupported page size"));
    }
    let header = FileHeader {
        page_size,
        salt: OsRng.next_u64(),
        format_version: page::PAGE_FORMAT_VERSION,
    };
    let mut buf = vec![0u8; page_size as usize];
    write_header_page(&mut buf, &header)?;
    io.write_at(0, &buf)?;

    let record = CommitRecord::initial();
    buf.fill(0);
    PageHeader::new(MARKER_PAGE, PageKind::CommitMarker, page_size, header.salt)?
        .encode(&mut buf[..PAGE_HDR_LEN])?;
    record.encode(&mut buf[PAGE_HDR_LEN..PAGE_HDR_LEN + SLOT_LEN]);
    io.write_at(page_offset(MARKER_PAGE, page_size), &buf)?;
    io.sync_all()?;
    Ok((header, record))
}

/// Encodes the header page into `buf` and seals its checksum.
pub fn write_header_page(buf: &mut [u8], header: &FileHeader) -> Result<()> {
    let page_size = header.page_size as usize;
    if buf.len() < page_size {
        return Err(PenumbraError::Invalid("header buffer too small"));
    }
    buf[..page_size].fill(0);
    PageHeader::new(HEADER_PAGE, PageKind::Header, header.page_size, header.salt)?
        .encode(&mut buf[..PAGE_HDR_LEN])?;
    buf[HEADER_SALT].copy_from_slice(&header.salt.to_be_bytes());
    buf[HEADER_PAGE_SIZE].copy_from_slice(&header.page_size.to_be_bytes());
    buf[HEADER_FORMAT_VERSION].copy_from_slice(&header.format_version.to_be_bytes());
    buf[HEADER_RESERVED].fill(0);
    seal_page(&mut buf[..page_size], HEADER_PAGE, header.salt)
}

/// Loads and verifies the header page.
pub fn load_header(io: &dyn FileIo) -> Result<FileHeader> {
    let mut probe = [0u8; PAGE_HDR_LEN];
    read_or_corrupt(io, 0, &mut probe, "header page truncated")?;
    let hdr = PageHeader::decode(&probe)?;
    if hdr.kind != PageKind::Header {
        return Err(PenumbraError::Corruption("page 0 is not a header page"));
    }
    if !page::is_valid_page_size(hdr.page_size) {
        return Err(PenumbraError::Corruption("header page size out of range"));
    }
    let mut buf = vec![0u8; hdr.page_size as usize];
    read_or_corrupt(io, 0, &mut buf, "header page truncated")?;
    verify_page(&buf, HEADER_PAGE, hdr.salt, hdr.page_size)?;
    let salt = u64::from_be_bytes(be(&buf[HEADER_SALT])?);
    let page_size = u32::from_be_bytes(be(&buf[HEADER_PAGE_SIZE])?);
    let format_version = u16::from_be_bytes(be(&buf[HEADER_FORMAT_VERSION])?);
    if salt != hdr.salt || page_size != hdr.page_size {
        return Err(PenumbraError::Corruption("header fields disagree with page header"));
    }
    if format_version != page::PAGE_FORMAT_VERSION {
        return Err(PenumbraError::Corruption("unsupported format version"));
    }
    Ok(FileHeader {
        page_size,
        salt,
        format_version,
    })
}

/// Reads both marker slots and returns the newest valid commit record.
pub fn load_commit_record(io: &dyn FileIo, header: &FileHeader) -> Result<CommitRecord> {
    let mut buf = vec![0u8; header.page_size as usize];
    read_or_corrupt(
        io,
        page_offset(MARKER_PAGE, header.page_size),
        &mut buf,
        "commit marker page truncated",
    )?;
    let hdr = PageHeader::decode(&buf)?;
    if hdr.kind != PageKind::CommitMarker || hdr.page_no != MARKER_PAGE {
        return Err(PenumbraError::Corruption("page 1 is not a commit marker"));
    }
    let mut best: Option<CommitRecord> = None;
    for slot in 0..SLOT_COUNT {
        let start = PAGE_HDR_LEN + slot * SLOT_LEN;
        let raw = &buf[start..start + SLOT_LEN];
        match CommitRecord::decode(raw) {
            Some(record) if record.slot() == slot => {
                if best.map_or(true, |b| record.version > b.version) {
                    best = Some(record);
                }
            }
            Some(_) => warn!(slot, "pager.marker.slot_misplaced"),
            None if raw.iter().any(|&b| b != 0) => warn!(slot, "pager.marker.slot_torn"),
            None => {}
        }
    }
    best.ok_or(PenumbraError::Corruption("no valid commit marker slot"))
}

/// Overwrites the marker slot belonging to `record.version`.
///
/// Only the slot's bytes are written so the other slot, which holds the
/// previous snapshot, is never touched.
pub fn write_commit_record(io: &dyn FileIo, header: &FileHeader, record: &CommitRecord) -> Result<()> {
    let mut slot = [0u8; SLOT_LEN];
    record.encode(&mut slot);
    io.write_at(slot_offset(record.slot(), header.page_size), &slot)
}

/// Zeroes the marker slot `record` was written to.
///
/// An all-zero slot is skipped on load, so the other slot's snapshot wins.
pub fn clear_commit_record(io: &dyn FileIo, header: &FileHeader, record: &CommitRecord) -> Result<()> {
    io.write_at(slot_offset(record.slot(), header.page_size), &[0u8; SLOT_LEN])
}

fn read_or_corrupt(io: &dyn FileIo, off: u64, dst: &mut [u8], what: &'static str) -> Result<()> {
    match io.read_at(off, dst) {
        Ok(()) => Ok(()),
        Err(PenumbraError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
            Err(PenumbraError::Corruption(what))
        }
        Err(err) => Err(err),
    }
}

fn be<const N: usize>(src: &[u8]) -> Result<[u8; N]> {
    src.try_into()
        .map_err(|_| PenumbraError::Corruption("header field truncated"))
}
