#![forbid(unsafe_code)]
//! Encoding, varint, and buffer utilities shared across storage layers.

pub mod ord {
    //! Order-preserving encoders for numeric and string keys.

    use crate::types::{PenumbraError, Result};

    const U64_LEN: usize = core::mem::size_of::<u64>();
    const SIGN_BIT: u64 = 1 << 63;

    const ESCAPE: u8 = 0x00;
    const ESCAPED_NUL: u8 = 0xFF;
    const TERMINATOR: u8 = 0x01;

    /// Appends a big-endian u64.
    pub fn push_u64_be(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Decodes a u64 from big-endian byte order.
    pub fn get_u64_be(src: &[u8]) -> Result<u64> {
        let head = src
            .get(..U64_LEN)
            .ok_or(PenumbraError::Corruption("u64 key component truncated"))?;
        let mut bytes = [0u8; U64_LEN];
        bytes.copy_from_slice(head);
        Ok(u64::from_be_bytes(bytes))
    }

    /// Appends a signed i64 with order preservation (flip sign bit for sorting).
    pub fn push_i64_be(dst: &mut Vec<u8>, v: i64) {
        push_u64_be(dst, (v as u64) ^ SIGN_BIT);
    }

    /// Decodes a signed i64 with order preservation.
    pub fn get_i64_be(src: &[u8]) -> Result<i64> {
        Ok((get_u64_be(src)? ^ SIGN_BIT) as i64)
    }

    /// Appends a self-delimiting byte string that sorts like the raw bytes.
    ///
    /// `0x00` is escaped as `0x00 0xFF` and the string ends with `0x00 0x01`,
    /// so no encoding is a prefix of another and order is preserved.
    pub fn push_escaped(dst: &mut Vec<u8>, bytes: &[u8]) {
        for &b in bytes {
            if b == ESCAPE {
                dst.push(ESCAPE);
                dst.push(ESCAPED_NUL);
            } else {
                dst.push(b);
            }
        }
        dst.push(ESCAPE);
        dst.push(TERMINATOR);
    }

    /// Decodes an escaped byte string, returning the bytes and the encoded length.
    pub fn split_escaped(src: &[u8]) -> Result<(Vec<u8>, usize)> {
        let mut out = Vec::new();
        let mut idx = 0;
        while idx < src.len() {
            let b = src[idx];
            if b != ESCAPE {
                out.push(b);
                idx += 1;
                continue;
            }
            match src.get(idx + 1) {
                Some(&ESCAPED_NUL) => out.push(0),
                Some(&TERMINATOR) => return Ok((out, idx + 2)),
                _ => return Err(PenumbraError::Corruption("bad escape in key")),
            }
            idx += 2;
        }
        Err(PenumbraError::Corruption("escaped key missing terminator"))
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use crate::types::{PenumbraError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            } else {
                out.push(byte | 0x80);
            }
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(PenumbraError::Corruption("varint truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(PenumbraError::Corruption("varint overflow"));
            }
            result |= payload << shift;
            if (byte & 0x80) == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(PenumbraError::Corruption("varint too long"))
    }

    /// Encodes an i64 as a ZigZag-encoded varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        encode_u64(zigzag, out);
    }

    /// Decodes a ZigZag-encoded i64 varint from a slice, updating the offset.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }

    /// Appends a varint length followed by the bytes.
    pub fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
        encode_u64(bytes.len() as u64, out);
        out.extend_from_slice(bytes);
    }
}

pub mod buf {
    //! A simple slice-backed cursor for ergonomic parsing.

    use core::fmt;

    use super::var;
    use crate::types::{PenumbraError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes from the cursor, advancing the offset.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(PenumbraError::Corruption("cursor offset overflow"))?;
            if end > self.buf.len() {
                return Err(PenumbraError::Corruption("cursor take beyond buffer"));
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads a single byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a big-endian u16.
        pub fn u16_be(&mut self) -> Result<u16> {
            let b = self.take(2)?;
            Ok(u16::from_be_bytes([b[0], b[1]]))
        }

        /// Reads a big-endian u32.
        pub fn u32_be(&mut self) -> Result<u32> {
            let b = self.take(4)?;
            Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        }

        /// Reads a big-endian u64.
        pub fn u64_be(&mut self) -> Result<u64> {
            super::ord::get_u64_be(self.take(8)?)
        }

        /// Reads an unsigned varint.
        pub fn var_u64(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads a ZigZag varint.
        pub fn var_i64(&mut self) -> Result<i64> {
            var::decode_i64(self.buf, &mut self.off)
        }

        /// Reads varint-length-prefixed bytes.
        pub fn var_bytes(&mut self) -> Result<&'a [u8]> {
            let len = usize::try_from(self.var_u64()?)
                .map_err(|_| PenumbraError::Corruption("length prefix overflow"))?;
            self.take(len)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
