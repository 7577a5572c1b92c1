#![forbid(unsafe_code)]

//! Copy-on-write B+ tree over byte keys and values.
//!
//! Trees are identified by their root page; every mutation returns the new
//! root. Pages committed by an earlier transaction are never modified: a
//! changed node moves to a fresh page and the old one is freed, so readers
//! pinned to an older root keep a consistent view.

mod cursor;
mod node;
mod stats;
mod tree;

pub use cursor::Cursor;
pub use node::{max_entry_len, node_capacity};
pub use stats::{tree_shape, TreeShape};
pub use tree::{free_tree, get, insert, remove};

/// Encoded size of a leaf entry, framing included.
pub fn entry_len(key: &[u8], value: &[u8]) -> usize {
    node::leaf_entry_len(key, value)
}
