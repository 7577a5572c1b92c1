#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::{PenumbraError, Result, Version};

/// Single-writer, multiple-reader coordinator.
///
/// The writer slot is try-only: a second writer fails fast with
/// [`PenumbraError::AlreadyWriting`] instead of queueing. Readers never block;
/// they only register the snapshot version they pin so that freed pages are
/// not recycled underneath them.
#[derive(Clone, Default)]
pub struct SingleWriter {
    inner: Arc<Mutex<LockState>>,
}

#[derive(Default, Debug)]
struct LockState {
    writer: bool,
    readers: BTreeMap<Version, u32>,
}

/// Snapshot of lock state for observability.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Number of active readers.
    pub readers: u32,
    /// Whether the writer slot is held.
    pub writer: bool,
    /// Oldest snapshot version pinned by a reader.
    pub oldest_reader: Option<Version>,
}

/// Guard representing the held writer slot.
pub struct WriterGuard {
    inner: Arc<Mutex<LockState>>,
}

/// Guard representing a reader pinned to a snapshot version.
pub struct ReaderGuard {
    inner: Arc<Mutex<LockState>>,
    version: Version,
}

impl SingleWriter {
    /// Creates an idle coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the writer slot or fails with `AlreadyWriting`.
    pub fn try_acquire_writer(&self) -> Result<WriterGuard> {
        let mut state = self.inner.lock();
        if state.writer {
            return Err(PenumbraError::AlreadyWriting);
        }
        state.writer = true;
        Ok(WriterGuard {
            inner: self.inner.clone(),
        })
    }

    /// Registers a reader observing `version`.
    pub fn pin_reader(&self, version: Version) -> ReaderGuard {
        let mut state = self.inner.lock();
        *state.readers.entry(version).or_insert(0) += 1;
        ReaderGuard {
            inner: self.inner.clone(),
            version,
        }
    }

    /// Oldest version pinned by any live reader.
    pub fn oldest_reader(&self) -> Option<Version> {
        self.inner.lock().readers.keys().next().copied()
    }

    /// Returns a snapshot of the current lock state.
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.inner.lock();
        LockSnapshot {
            readers: state.readers.values().sum(),
            writer: state.writer,
            oldest_reader: state.readers.keys().next().copied(),
        }
    }
}

impl ReaderGuard {
    /// Version this reader is pinned to.
    pub fn version(&self) -> Version {
        self.version
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.inner.lock().writer = false;
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if let Some(count) = state.readers.get_mut(&self.version) {
            *count -= 1;
            if *count == 0 {
                state.readers.remove(&self.version);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_writer_fails_fast() {
        let locks = SingleWriter::new();
        let guard = locks.try_acquire_writer().unwrap();
        assert!(matches!(
            locks.try_acquire_writer(),
            Err(PenumbraError::AlreadyWriting)
        ));
        assert!(locks.snapshot().writer);
        drop(guard);
        assert!(!locks.snapshot().writer);
        locks.try_acquire_writer().unwrap();
    }

    #[test]
    fn readers_track_oldest_pin() {
        let locks = SingleWriter::new();
        assert_eq!(locks.oldest_reader(), None);
        let a = locks.pin_reader(Version(5));
        let b = locks.pin_reader(Version(3));
        let c = locks.pin_reader(Version(3));
        assert_eq!(locks.oldest_reader(), Some(Version(3)));
        assert_eq!(locks.snapshot().readers, 3);
        drop(b);
        assert_eq!(locks.oldest_reader(), Some(Version(3)));
        drop(c);
        assert_eq!(locks.oldest_reader(), Some(Version(5)));
        assert_eq!(a.version(), Version(5));
        drop(a);
        assert_eq!(locks.snapshot(), LockSnapshot::default());
    }

    #[test]
    fn readers_do_not_block_writer() {
        let locks = SingleWriter::new();
        let _reader = locks.pin_reader(Version(1));
        let _writer = locks.try_acquire_writer().unwrap();
        let _late_reader = locks.pin_reader(Version(1));
        assert_eq!(locks.snapshot().readers, 2);
    }
}
