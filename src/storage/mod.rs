//! Record storage engine and its on-disk structures.
//!
//! Records, per-type extents, secondary indexes and the index catalog each
//! live in a copy-on-write B+ tree whose root is published in the commit
//! record. Bodies that do not fit inline spill into overflow chains.

/// Copy-on-write B+ tree.
pub mod btree;

/// Secondary equality indexes and the index catalog.
pub mod index;

/// Record table, extents and record scans.
pub mod record;

/// Overflow page chains for large record bodies.
pub mod vstore;

mod props;
mod types;

pub use props::{decode_fields, encode_fields, push_value_key, split_value_key};
pub use record::RecordScan;
pub use types::{fields, Fields, Record, Value, ValueKind};

#[cfg(test)]
pub(crate) mod testing;
