#![forbid(unsafe_code)]

//! Store administration utilities.
//!
//! Statistics reporting and integrity verification over the latest committed
//! snapshot, used by the `penumbra` command-line tool.

mod error;
mod stats;
mod util;
mod verify;

/// Error types for administrative operations.
pub use error::{AdminError, Result};

/// Statistics collection and reporting.
///
/// Commit-marker counters, tree shapes, free-space and lock state, and
/// per-type record counts.
pub use stats::{
    stats, FilesystemStats, FreePagesSection, LockSection, PagerSection, SnapshotSection,
    StatsReport, TreesSection, TypeStats,
};

/// Store integrity verification.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};

/// Opens an existing store for an admin command.
pub use util::open_store;
