#![forbid(unsafe_code)]

//! Positioned file access for the pager.
//!
//! Everything the store does to its file goes through [`FileIo`], so tests
//! can swap in [`FaultyIo`] to fail or tear individual writes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::Result;

mod fault;

pub use fault::{FaultPlan, FaultyIo};

/// Byte-addressed access to the store file.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from offset `off`; reading past the end is an error.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at offset `off`, growing the file if needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Durability barrier for everything written so far.
    fn sync_all(&self) -> Result<()>;
    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
    /// True for a freshly created file.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Cuts the file to `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;
}

/// [`FileIo`] over a real file.
#[derive(Clone)]
pub struct StdFileIo {
    file: Arc<File>,
    path: PathBuf,
}

impl StdFileIo {
    /// Opens `path` for reading and writing, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Location of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for StdFileIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdFileIo").field("path", &self.path).finish()
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<()> {
        while !dst.is_empty() {
            match positioned::read(&self.file, dst, off)? {
                0 => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("read at offset {off} is past the end of {}", self.path.display()),
                    )
                    .into())
                }
                n => {
                    dst = &mut dst[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            match positioned::write(&self.file, src, off)? {
                0 => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                n => {
                    src = &src[n..];
                    off += n as u64;
                }
            }
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        Ok(self.file.sync_all()?)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        Ok(self.file.set_len(len)?)
    }
}

/// One positioned read or write; short transfers are retried by the caller.
mod positioned {
    use std::fs::File;
    use std::io;

    #[cfg(unix)]
    pub fn read(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(file, dst, off)
    }

    #[cfg(unix)]
    pub fn write(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(file, src, off)
    }

    #[cfg(windows)]
    pub fn read(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(file, dst, off)
    }

    #[cfg(windows)]
    pub fn write(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(file, src, off)
    }

    #[cfg(not(any(unix, windows)))]
    pub fn read(_file: &File, _dst: &mut [u8], _off: u64) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }

    #[cfg(not(any(unix, windows)))]
    pub fn write(_file: &File, _src: &[u8], _off: u64) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }
}
