#![forbid(unsafe_code)]
//! Fault injection wrapper used by crash-consistency tests.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::FileIo;
use crate::types::{PenumbraError, Result};

#[derive(Debug, Default)]
struct PlanState {
    writes_before_failure: Option<u64>,
    tear_failing_write: bool,
    fail_sync: bool,
    syncs_before_failure: Option<u64>,
    writes: u64,
    syncs: u64,
    injected: u64,
}

/// Shared, cloneable switchboard controlling when a [`FaultyIo`] fails.
#[derive(Clone, Debug, Default)]
pub struct FaultPlan {
    state: Arc<Mutex<PlanState>>,
}

impl FaultPlan {
    /// Creates a plan that injects nothing until armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `n` more writes succeed, then fails every write after that.
    pub fn fail_writes_after(&self, n: u64) {
        let mut state = self.state.lock();
        state.writes_before_failure = Some(n);
    }

    /// When the failing write is reached, persist its first half before erroring.
    pub fn tear_failing_write(&self, tear: bool) {
        self.state.lock().tear_failing_write = tear;
    }

    /// Makes every `sync_all` fail.
    pub fn fail_syncs(&self, fail: bool) {
        self.state.lock().fail_sync = fail;
    }

    /// Lets `n` more syncs succeed, then fails the next one only.
    pub fn fail_sync_after(&self, n: u64) {
        self.state.lock().syncs_before_failure = Some(n);
    }

    /// Disarms all faults.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.writes_before_failure = None;
        state.tear_failing_write = false;
        state.fail_sync = false;
        state.syncs_before_failure = None;
    }

    /// Number of successful writes observed.
    pub fn writes(&self) -> u64 {
        self.state.lock().writes
    }

    /// Number of successful syncs observed.
    pub fn syncs(&self) -> u64 {
        self.state.lock().syncs
    }

    /// Number of faults injected so far.
    pub fn injected(&self) -> u64 {
        self.state.lock().injected
    }
}

enum WriteDecision {
    Pass,
    Fail { tear: bool },
}

/// A [`FileIo`] that forwards to an inner implementation until its plan fires.
pub struct FaultyIo {
    inner: Arc<dyn FileIo>,
    plan: FaultPlan,
}

impl FaultyIo {
    /// Wraps `inner`, consulting `plan` before each write and sync.
    pub fn new(inner: Arc<dyn FileIo>, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }

    fn decide_write(&self) -> WriteDecision {
        let mut state = self.plan.state.lock();
        match state.writes_before_failure {
            Some(0) => {
                state.injected += 1;
                let tear = state.tear_failing_write;
                // only the first failing write may be torn
                state.tear_failing_write = false;
                WriteDecision::Fail { tear }
            }
            Some(ref mut remaining) => {
                *remaining -= 1;
                state.writes += 1;
                WriteDecision::Pass
            }
            None => {
                state.writes += 1;
                WriteDecision::Pass
            }
        }
    }
}

fn injected_error(what: &str) -> PenumbraError {
    PenumbraError::Io(io::Error::other(format!("injected {what} fault")))
}

impl FileIo for FaultyIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.inner.read_at(off, dst)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        match self.decide_write() {
            WriteDecision::Pass => self.inner.write_at(off, src),
            WriteDecision::Fail { tear } => {
                if tear && src.len() > 1 {
                    self.inner.write_at(off, &src[..src.len() / 2])?;
                }
                Err(injected_error("write"))
            }
        }
    }

    fn sync_all(&self) -> Result<()> {
        {
            let mut state = self.plan.state.lock();
            let one_shot = match state.syncs_before_failure {
                Some(0) => {
                    state.syncs_before_failure = None;
                    true
                }
                Some(ref mut remaining) => {
                    *remaining -= 1;
                    false
                }
                None => false,
            };
            if state.fail_sync || one_shot {
                state.injected += 1;
                return Err(injected_error("sync"));
            }
            state.syncs += 1;
        }
        self.inner.sync_all()
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.inner.truncate(len)
    }
}
