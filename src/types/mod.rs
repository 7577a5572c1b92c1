#![forbid(unsafe_code)]
//! Identifiers, the crate error type and the on-disk page header shared by
//! every storage layer.

use std::fmt;

/// Checksum helpers used to seal and verify pages.
pub mod checksum;

pub use checksum::page_crc32;

/// Primary identifier of a record. Assigned at insert, never reused.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct RecordId(pub u64);

/// Identifier of a fixed-size page in the store file.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);

/// Monotonic commit version; every successful non-empty commit bumps it by one.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Version(pub u64);

impl PageId {
    /// Sentinel used for "no page" (page 0 is always the header page).
    pub const NONE: PageId = PageId(0);

    /// Returns true if this is the "no page" sentinel.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl Version {
    /// Returns the version following this one.
    pub fn next(self) -> Version {
        Version(self.0.saturating_add(1))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(value: u64) -> Self {
        RecordId(value)
    }
}

impl From<RecordId> for u64 {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

/// Errors surfaced by the storage engine.
#[derive(thiserror::Error, Debug)]
pub enum PenumbraError {
    /// Underlying file I/O failed (including injected faults).
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The store reached its configured page limit.
    #[error("out of space: page limit of {limit} pages reached")]
    OutOfSpace {
        /// Configured maximum number of pages.
        limit: u64,
    },
    /// A mutation was attempted outside an open write transaction.
    #[error("no active write transaction")]
    NoActiveTransaction,
    /// Another write transaction is already open.
    #[error("a write transaction is already open")]
    AlreadyWriting,
    /// The configuration was rejected at open time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A record or query does not match the declared schema.
    #[error("schema: {0}")]
    Schema(String),
    /// Persisted data failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Invalid argument supplied by the caller.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PenumbraError>;

pub mod page {
    //! Shared on-disk page metadata used by pager components.

    use core::convert::{TryFrom, TryInto};

    use super::{PageId, PenumbraError, Result};

    pub const PAGE_MAGIC: [u8; 4] = *b"PNBR";
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    pub const DEFAULT_PAGE_SIZE: u32 = 4096;
    pub const MIN_PAGE_SIZE: u32 = 1024;
    pub const MAX_PAGE_SIZE: u32 = 65536;
    pub const PAGE_HDR_LEN: usize = 32;

    pub mod header {
        //! Byte offsets for fixed header fields.
        use core::ops::Range;

        pub const MAGIC: Range<usize> = 0..4;
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        pub const PAGE_KIND: usize = 6;
        pub const RESERVED: usize = 7;
        pub const PAGE_SIZE: Range<usize> = 8..12;
        pub const PAGE_NO: Range<usize> = 12..20;
        pub const SALT: Range<usize> = 20..28;
        pub const CRC32: Range<usize> = 28..32;
    }

    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum PageKind {
        Header = 1,
        CommitMarker = 2,
        FreeList = 3,
        BTreeLeaf = 4,
        BTreeInternal = 5,
        Overflow = 6,
    }

    impl PageKind {
        pub const fn as_u8(self) -> u8 {
            self as u8
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = PenumbraError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::Header),
                2 => Ok(PageKind::CommitMarker),
                3 => Ok(PageKind::FreeList),
                4 => Ok(PageKind::BTreeLeaf),
                5 => Ok(PageKind::BTreeInternal),
                6 => Ok(PageKind::Overflow),
                _ => Err(PenumbraError::Corruption("unknown page kind")),
            }
        }
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        pub format_version: u16,
        pub kind: PageKind,
        pub page_size: u32,
        pub page_no: PageId,
        pub salt: u64,
        pub crc32: u32,
    }

    impl PageHeader {
        pub fn new(page_no: PageId, kind: PageKind, page_size: u32, salt: u64) -> Result<Self> {
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(PenumbraError::Invalid("page size smaller than header"));
            }
            Ok(Self {
                format_version: PAGE_FORMAT_VERSION,
                kind,
                page_size,
                page_no,
                salt,
                crc32: 0,
            })
        }

        pub fn with_crc32(mut self, crc32: u32) -> Self {
            self.crc32 = crc32;
            self
        }

        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(PenumbraError::Invalid("page header buffer too small"));
            }
            let hdr = &mut dst[..PAGE_HDR_LEN];
            hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
            hdr[header::PAGE_KIND] = self.kind.as_u8();
            hdr[header::RESERVED] = 0;
            hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
            hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
            hdr[header::SALT].copy_from_slice(&self.salt.to_be_bytes());
            hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            Ok(())
        }

        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(PenumbraError::Corruption("page header truncated"));
            }
            let hdr = &src[..PAGE_HDR_LEN];
            if hdr[header::MAGIC] != PAGE_MAGIC {
                return Err(PenumbraError::Corruption("invalid page magic"));
            }
            let format_version = u16::from_be_bytes(be_array(&hdr[header::FORMAT_VERSION])?);
            if format_version != PAGE_FORMAT_VERSION {
                return Err(PenumbraError::Corruption(
                    "unsupported page format version",
                ));
            }
            if hdr[header::RESERVED] != 0 {
                return Err(PenumbraError::Corruption(
                    "page header reserved byte not zero",
                ));
            }
            let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
            let page_size = u32::from_be_bytes(be_array(&hdr[header::PAGE_SIZE])?);
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(PenumbraError::Corruption("page size smaller than header"));
            }
            let page_no = PageId(u64::from_be_bytes(be_array(&hdr[header::PAGE_NO])?));
            let salt = u64::from_be_bytes(be_array(&hdr[header::SALT])?);
            let crc32 = u32::from_be_bytes(be_array(&hdr[header::CRC32])?);
            Ok(Self {
                format_version,
                kind,
                page_size,
                page_no,
                salt,
                crc32,
            })
        }
    }

    pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
        if buf.len() < header::CRC32.end {
            return Err(PenumbraError::Invalid("page header buffer too small"));
        }
        buf[header::CRC32].fill(0);
        Ok(())
    }

    /// Returns true if `page_size` is a power of two within the supported range.
    pub fn is_valid_page_size(page_size: u32) -> bool {
        page_size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size)
    }

    fn be_array<const N: usize>(src: &[u8]) -> Result<[u8; N]> {
        src.try_into()
            .map_err(|_| PenumbraError::Corruption("page header field truncated"))
    }
}
