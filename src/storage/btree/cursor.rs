use std::collections::VecDeque;

use crate::primitives::pager::PageSource;
use crate::types::{PageId, Result};

use super::node::{child_index, Node};
use super::tree::load_node;

/// Ordered cursor over every entry whose key starts with a prefix.
///
/// The cursor holds no page references between calls. When a leaf is
/// exhausted it re-seeks from the root using the tightest upper fence seen
/// on the way down, so it can be driven against any [`PageSource`] that
/// reflects the same tree.
#[derive(Clone, Debug)]
pub struct Cursor {
    root: PageId,
    prefix: Vec<u8>,
    seek: Option<Vec<u8>>,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl Cursor {
    /// Positions a cursor at the first key `>= prefix`.
    pub fn prefix(root: PageId, prefix: &[u8]) -> Self {
        Self {
            root,
            prefix: prefix.to_vec(),
            seek: (!root.is_none()).then(|| prefix.to_vec()),
            buffer: VecDeque::new(),
        }
    }

    /// Cursor over the whole tree.
    pub fn all(root: PageId) -> Self {
        Self::prefix(root, &[])
    }

    /// Rewinds to the first matching key.
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.seek = (!self.root.is_none()).then(|| self.prefix.clone());
    }

    /// Returns the next `(key, value)` pair in key order.
    pub fn next<S: PageSource + ?Sized>(&mut self, src: &S) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            if let Some((key, value)) = self.buffer.pop_front() {
                if key.starts_with(&self.prefix) {
                    return Ok(Some((key, value)));
                }
                self.finish();
                return Ok(None);
            }
            let Some(from) = self.seek.take() else {
                return Ok(None);
            };
            self.fill(src, &from)?;
        }
    }

    fn finish(&mut self) {
        self.buffer.clear();
        self.seek = None;
    }

    fn fill<S: PageSource + ?Sized>(&mut self, src: &S, from: &[u8]) -> Result<()> {
        let mut page = self.root;
        let mut fence = None;
        loop {
            match load_node(src, page)? {
                Node::Internal { mut keys, children } => {
                    let idx = child_index(&keys, from);
                    if idx < keys.len() {
                        fence = Some(keys.swap_remove(idx));
                    }
                    page = children[idx];
                }
                Node::Leaf(entries) => {
                    self.buffer
                        .extend(entries.into_iter().filter(|(k, _)| k.as_slice() >= from));
                    self.seek = fence;
                    return Ok(());
                }
            }
        }
    }
}
