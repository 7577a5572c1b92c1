#![forbid(unsafe_code)]

//! Overflow page chains for record bodies too large to store inline.

use std::cmp::min;
use std::convert::TryInto;

use crate::primitives::pager::{PageSink, PageSource};
use crate::types::page::{PageHeader, PageKind, PAGE_HDR_LEN};
use crate::types::{checksum::crc32, PageId, PenumbraError, Result};
use tracing::trace;

const OVERFLOW_NEXT: usize = PAGE_HDR_LEN;
const OVERFLOW_USED: usize = PAGE_HDR_LEN + 8;
const OVERFLOW_HEADER_LEN: usize = 16;

/// Reference to a value stored in an overflow chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VRef {
    /// First page of the chain.
    pub start_page: PageId,
    /// Number of pages in the chain.
    pub n_pages: u32,
    /// Total value length in bytes.
    pub len: u32,
    /// CRC32 of the value bytes.
    pub checksum: u32,
}

impl VRef {
    /// Encoded size of a reference.
    pub const ENCODED_LEN: usize = 20;

    /// Appends the fixed-width encoding.
    pub fn encode(&self, dst: &mut Vec<u8>) {
        dst.extend_from_slice(&self.start_page.0.to_be_bytes());
        dst.extend_from_slice(&self.n_pages.to_be_bytes());
        dst.extend_from_slice(&self.len.to_be_bytes());
        dst.extend_from_slice(&self.checksum.to_be_bytes());
    }

    /// Decodes a reference written by [`VRef::encode`].
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != Self::ENCODED_LEN {
            return Err(PenumbraError::Corruption("overflow reference length"));
        }
        let u32_at = |off: usize| u32::from_be_bytes([src[off], src[off + 1], src[off + 2], src[off + 3]]);
        let mut start = [0u8; 8];
        start.copy_from_slice(&src[..8]);
        Ok(Self {
            start_page: PageId(u64::from_be_bytes(start)),
            n_pages: u32_at(8),
            len: u32_at(12),
            checksum: u32_at(16),
        })
    }
}

/// Bytes of value data an overflow page carries.
pub fn data_capacity(page_size: usize) -> usize {
    page_size - PAGE_HDR_LEN - OVERFLOW_HEADER_LEN
}

/// Writes `bytes` into a newly allocated overflow chain.
pub fn write<S: PageSink + ?Sized>(sink: &mut S, bytes: &[u8]) -> Result<VRef> {
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| PenumbraError::Invalid("value larger than 4GB not supported"))?;
    let page_size = sink.page_size();
    let capacity = data_capacity(page_size);
    let needed = bytes.len().div_ceil(capacity).max(1);
    let mut pages = Vec::with_capacity(needed);
    for _ in 0..needed {
        pages.push(sink.allocate()?);
    }
    let mut offset = 0;
    for (idx, &page) in pages.iter().enumerate() {
        let next = pages.get(idx + 1).copied().unwrap_or(PageId::NONE);
        let chunk_len = min(bytes.len() - offset, capacity);
        let mut image = vec![0u8; page_size];
        image[OVERFLOW_NEXT..OVERFLOW_NEXT + 8].copy_from_slice(&next.0.to_be_bytes());
        image[OVERFLOW_USED..OVERFLOW_USED + 4].copy_from_slice(&(chunk_len as u32).to_be_bytes());
        let data = PAGE_HDR_LEN + OVERFLOW_HEADER_LEN;
        image[data..data + chunk_len].copy_from_slice(&bytes[offset..offset + chunk_len]);
        sink.write(page, PageKind::Overflow, image)?;
        offset += chunk_len;
    }
    trace!(pages = pages.len(), len, "vstore.write");
    Ok(VRef {
        start_page: pages[0],
        n_pages: pages.len() as u32,
        len,
        checksum: crc32(bytes),
    })
}

/// Reads and verifies the value behind `vref`.
pub fn read<S: PageSource + ?Sized>(src: &S, vref: VRef) -> Result<Vec<u8>> {
    let mut dst = Vec::with_capacity(vref.len as usize);
    let mut remaining = vref.len as usize;
    let mut current = vref.start_page;
    for _ in 0..vref.n_pages {
        if current.is_none() {
            return Err(PenumbraError::Corruption("overflow chain terminated early"));
        }
        let image = src.load(current)?;
        let (next, data) = decode_page(&image)?;
        if data.len() > remaining {
            return Err(PenumbraError::Corruption(
                "overflow chain exceeded reported length",
            ));
        }
        dst.extend_from_slice(data);
        remaining -= data.len();
        current = next;
    }
    if !current.is_none() {
        return Err(PenumbraError::Corruption("overflow chain longer than n_pages"));
    }
    if remaining != 0 {
        return Err(PenumbraError::Corruption(
            "overflow chain shorter than reported length",
        ));
    }
    if crc32(&dst) != vref.checksum {
        return Err(PenumbraError::Corruption("overflow checksum mismatch"));
    }
    trace!(pages = vref.n_pages, len = vref.len, "vstore.read");
    Ok(dst)
}

/// Releases every page of the chain behind `vref`.
pub fn free<S: PageSink + ?Sized>(sink: &mut S, vref: VRef) -> Result<()> {
    let mut current = vref.start_page;
    for _ in 0..vref.n_pages {
        if current.is_none() {
            return Err(PenumbraError::Corruption(
                "overflow free chain shorter than expected",
            ));
        }
        let image = sink.load(current)?;
        let (next, _) = decode_page(&image)?;
        sink.free(current)?;
        current = next;
    }
    trace!(pages = vref.n_pages, len = vref.len, "vstore.free");
    Ok(())
}

fn decode_page(image: &[u8]) -> Result<(PageId, &[u8])> {
    let header = PageHeader::decode(image)?;
    if header.kind != PageKind::Overflow {
        return Err(PenumbraError::Corruption("overflow page kind mismatch"));
    }
    let mut next = [0u8; 8];
    next.copy_from_slice(&image[OVERFLOW_NEXT..OVERFLOW_NEXT + 8]);
    let mut used = [0u8; 4];
    used.copy_from_slice(&image[OVERFLOW_USED..OVERFLOW_USED + 4]);
    let used = u32::from_be_bytes(used) as usize;
    let data = PAGE_HDR_LEN + OVERFLOW_HEADER_LEN;
    let payload = image
        .get(data..data + used)
        .ok_or(PenumbraError::Corruption("overflow page used length"))?;
    Ok((PageId(u64::from_be_bytes(next)), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::io::{FileIo, StdFileIo};
    use crate::primitives::pager::{PageAllocator, Pager, PagerOptions, StagedPages, TxnPages};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn staged_pager(dir: &std::path::Path) -> (Pager, StagedPages) {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(dir.join("v.db")).unwrap());
        let options = PagerOptions {
            page_size: 1024,
            ..PagerOptions::default()
        };
        let (pager, record, free) = Pager::open(io, options).unwrap();
        let staged = StagedPages::new(PageAllocator::new(free, record.next_page, None));
        (pager, staged)
    }

    #[test]
    fn multi_page_value_roundtrips() {
        let dir = tempdir().unwrap();
        let (pager, mut staged) = staged_pager(dir.path());
        let mut pages = TxnPages::new(&pager, &mut staged);
        let value: Vec<u8> = (0..5_000u32).map(|i| (i % 251) as u8).collect();
        let vref = write(&mut pages, &value).unwrap();
        assert_eq!(vref.n_pages as usize, value.len().div_ceil(data_capacity(1024)));
        assert_eq!(read(&pages, vref).unwrap(), value);

        let mut encoded = Vec::new();
        vref.encode(&mut encoded);
        assert_eq!(encoded.len(), VRef::ENCODED_LEN);
        assert_eq!(VRef::decode(&encoded).unwrap(), vref);
    }

    #[test]
    fn free_releases_the_whole_chain() {
        let dir = tempdir().unwrap();
        let (pager, mut staged) = staged_pager(dir.path());
        let mut pages = TxnPages::new(&pager, &mut staged);
        let vref = write(&mut pages, &[7u8; 3_000]).unwrap();
        free(&mut pages, vref).unwrap();
        assert_eq!(staged.dirty_len(), 0);
        assert_eq!(staged.allocator().reclaimable_count(), vref.n_pages as usize);
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let dir = tempdir().unwrap();
        let (pager, mut staged) = staged_pager(dir.path());
        let mut pages = TxnPages::new(&pager, &mut staged);
        let mut vref = write(&mut pages, b"payload").unwrap();
        vref.checksum ^= 1;
        assert!(matches!(
            read(&pages, vref),
            Err(PenumbraError::Corruption("overflow checksum mismatch"))
        ));
    }
}
