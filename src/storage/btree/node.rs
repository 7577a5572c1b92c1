use std::cmp::Ordering;

use crate::primitives::bytes::buf::Cursor;
use crate::types::{
    page::{PageHeader, PageKind, PAGE_HDR_LEN},
    PageId, PenumbraError, Result,
};

const COUNT_LEN: usize = 2;
const CHILD_LEN: usize = 8;
const LEAF_ENTRY_OVERHEAD: usize = 4;
const INTERNAL_ENTRY_OVERHEAD: usize = 2 + CHILD_LEN;

/// Bytes available to node contents after the page and node headers.
pub fn node_capacity(page_size: usize) -> usize {
    page_size - PAGE_HDR_LEN - COUNT_LEN - CHILD_LEN
}

/// Largest leaf entry (key + value + framing) a node accepts.
///
/// Bounded to a quarter of the node so that any split leaves two halves
/// that fit.
pub fn max_entry_len(page_size: usize) -> usize {
    node_capacity(page_size) / 4
}

/// Encoded size of a leaf entry.
pub fn leaf_entry_len(key: &[u8], value: &[u8]) -> usize {
    LEAF_ENTRY_OVERHEAD + key.len() + value.len()
}

/// Decoded B+tree node.
///
/// Internal nodes hold `keys.len() + 1` children; child `i` covers keys in
/// `[keys[i - 1], keys[i])`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Node {
    Leaf(Vec<(Vec<u8>, Vec<u8>)>),
    Internal {
        keys: Vec<Vec<u8>>,
        children: Vec<PageId>,
    },
}

impl Node {
    pub fn decode(image: &[u8]) -> Result<Self> {
        let header = PageHeader::decode(image)?;
        let mut cur = Cursor::new(&image[PAGE_HDR_LEN..]);
        let count = cur.u16_be()? as usize;
        match header.kind {
            PageKind::BTreeLeaf => {
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let klen = cur.u16_be()? as usize;
                    let vlen = cur.u16_be()? as usize;
                    let key = cur.take(klen)?.to_vec();
                    let value = cur.take(vlen)?.to_vec();
                    entries.push((key, value));
                }
                Ok(Node::Leaf(entries))
            }
            PageKind::BTreeInternal => {
                let mut children = Vec::with_capacity(count + 1);
                children.push(PageId(cur.u64_be()?));
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    let klen = cur.u16_be()? as usize;
                    keys.push(cur.take(klen)?.to_vec());
                    children.push(PageId(cur.u64_be()?));
                }
                Ok(Node::Internal { keys, children })
            }
            _ => Err(PenumbraError::Corruption("page is not a btree node")),
        }
    }

    /// Encodes into a page image whose header is left for the pager to seal.
    pub fn encode(&self, page_size: usize) -> Result<(PageKind, Vec<u8>)> {
        if self.encoded_len() > node_capacity(page_size) {
            return Err(PenumbraError::Invalid("btree node overflows page"));
        }
        let mut body = Vec::with_capacity(page_size - PAGE_HDR_LEN);
        let kind = match self {
            Node::Leaf(entries) => {
                body.extend_from_slice(&(entries.len() as u16).to_be_bytes());
                for (key, value) in entries {
                    body.extend_from_slice(&(key.len() as u16).to_be_bytes());
                    body.extend_from_slice(&(value.len() as u16).to_be_bytes());
                    body.extend_from_slice(key);
                    body.extend_from_slice(value);
                }
                PageKind::BTreeLeaf
            }
            Node::Internal { keys, children } => {
                body.extend_from_slice(&(keys.len() as u16).to_be_bytes());
                body.extend_from_slice(&children[0].0.to_be_bytes());
                for (key, child) in keys.iter().zip(&children[1..]) {
                    body.extend_from_slice(&(key.len() as u16).to_be_bytes());
                    body.extend_from_slice(key);
                    body.extend_from_slice(&child.0.to_be_bytes());
                }
                PageKind::BTreeInternal
            }
        };
        let mut image = vec![0u8; page_size];
        image[PAGE_HDR_LEN..PAGE_HDR_LEN + body.len()].copy_from_slice(&body);
        Ok((kind, image))
    }

    /// Bytes used by entries, excluding the fixed node header.
    pub fn encoded_len(&self) -> usize {
        match self {
            Node::Leaf(entries) => entries.iter().map(|(k, v)| leaf_entry_len(k, v)).sum(),
            Node::Internal { keys, .. } => {
                keys.iter().map(|k| INTERNAL_ENTRY_OVERHEAD + k.len()).sum()
            }
        }
    }

    /// Splits an overfull node near its byte midpoint, returning
    /// `(left, separator, right)`.
    pub fn split(self) -> (Node, Vec<u8>, Node) {
        let half = self.encoded_len() / 2;
        match self {
            Node::Leaf(mut entries) => {
                let mut acc = 0;
                let mut at = entries.len() - 1;
                for (idx, (k, v)) in entries.iter().enumerate() {
                    acc += leaf_entry_len(k, v);
                    if acc >= half {
                        at = idx + 1;
                        break;
                    }
                }
                let at = at.clamp(1, entries.len() - 1);
                let right = entries.split_off(at);
                let separator = right[0].0.clone();
                (Node::Leaf(entries), separator, Node::Leaf(right))
            }
            Node::Internal {
                mut keys,
                mut children,
            } => {
                let mut acc = 0;
                let mut mid = keys.len() / 2;
                for (idx, key) in keys.iter().enumerate() {
                    acc += INTERNAL_ENTRY_OVERHEAD + key.len();
                    if acc >= half {
                        mid = idx;
                        break;
                    }
                }
                let mid = mid.min(keys.len() - 1);
                let right_keys = keys.split_off(mid + 1);
                let separator = keys.pop().unwrap_or_default();
                let right_children = children.split_off(mid + 1);
                (
                    Node::Internal { keys, children },
                    separator,
                    Node::Internal {
                        keys: right_keys,
                        children: right_children,
                    },
                )
            }
        }
    }
}

/// Index of the child covering `key`: the number of separators `<= key`.
pub fn child_index(keys: &[Vec<u8>], key: &[u8]) -> usize {
    keys.partition_point(|sep| sep.as_slice().cmp(key) != Ordering::Greater)
}
