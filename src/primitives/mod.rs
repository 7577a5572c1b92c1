//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, I/O operations, concurrency controls
//! and the paging layer.

/// Byte-level utilities and encoding/decoding.
///
/// Order-preserving key encoders, varints and a parsing cursor.
pub mod bytes;

/// Concurrency primitives and synchronization.
///
/// Single-writer latch and reader snapshot pins.
pub mod concurrency;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations, plus fault injection.
pub mod io;

/// Paging subsystem.
///
/// Header and commit-marker pages, the free list, and the page cache.
pub mod pager;
