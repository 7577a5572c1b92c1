#![forbid(unsafe_code)]

use super::page::{self, PageHeader, PAGE_HDR_LEN};
use super::{PageId, PenumbraError, Result};

/// CRC32 over page number, file salt and the page bytes (CRC field zeroed).
pub fn page_crc32(page_no: u64, salt: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_no.to_be_bytes());
    hasher.update(&salt.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Plain CRC32 over a byte slice, used for commit-marker slots and overflow bodies.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Computes and stores the CRC of a page whose header is already encoded.
pub fn seal_page(buf: &mut [u8], page_no: PageId, salt: u64) -> Result<()> {
    page::clear_crc32(&mut buf[..PAGE_HDR_LEN])?;
    let crc = page_crc32(page_no.0, salt, buf);
    buf[page::header::CRC32].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

/// Validates the header and CRC of a page image read from disk.
pub fn verify_page(buf: &[u8], page_no: PageId, salt: u64, page_size: u32) -> Result<PageHeader> {
    let header = PageHeader::decode(buf)?;
    if header.page_no != page_no {
        return Err(PenumbraError::Corruption("page number mismatch"));
    }
    if header.page_size != page_size {
        return Err(PenumbraError::Corruption("page size mismatch"));
    }
    let mut scratch = buf.to_vec();
    page::clear_crc32(&mut scratch[..PAGE_HDR_LEN])?;
    if page_crc32(page_no.0, salt, &scratch) != header.crc32 {
        return Err(PenumbraError::Corruption("page crc mismatch"));
    }
    Ok(header)
}
