use crate::primitives::pager::{PageSink, PageSource};
use crate::types::{PageId, PenumbraError, Result};

use super::node::{child_index, leaf_entry_len, max_entry_len, node_capacity, Node};

enum Insertion {
    Done(PageId),
    Split(PageId, Vec<u8>, PageId),
}

enum Removal {
    NotFound,
    Updated(PageId),
    Emptied,
}

pub(crate) fn load_node<S: PageSource + ?Sized>(src: &S, id: PageId) -> Result<Node> {
    if id.is_none() {
        return Err(PenumbraError::Corruption("btree child points at page 0"));
    }
    let image = src.load(id)?;
    Node::decode(&image)
}

/// Stages `node` for page `old`, rewriting in place when `old` was allocated
/// by this transaction and moving to a fresh page otherwise.
fn store_node<S: PageSink + ?Sized>(sink: &mut S, old: Option<PageId>, node: &Node) -> Result<PageId> {
    let (kind, image) = node.encode(sink.page_size())?;
    let target = match old {
        Some(id) if sink.is_fresh(id) => id,
        Some(id) => {
            let next = sink.allocate()?;
            sink.free(id)?;
            next
        }
        None => sink.allocate()?,
    };
    sink.write(target, kind, image)?;
    Ok(target)
}

fn store_or_split<S: PageSink + ?Sized>(sink: &mut S, page: PageId, node: Node) -> Result<Insertion> {
    if node.encoded_len() <= node_capacity(sink.page_size()) {
        return Ok(Insertion::Done(store_node(sink, Some(page), &node)?));
    }
    let (left, separator, right) = node.split();
    let left_id = store_node(sink, Some(page), &left)?;
    let right_id = store_node(sink, None, &right)?;
    Ok(Insertion::Split(left_id, separator, right_id))
}

/// Looks up `key` in the tree rooted at `root`.
pub fn get<S: PageSource + ?Sized>(src: &S, root: PageId, key: &[u8]) -> Result<Option<Vec<u8>>> {
    if root.is_none() {
        return Ok(None);
    }
    let mut page = root;
    loop {
        match load_node(src, page)? {
            Node::Leaf(entries) => {
                return Ok(entries
                    .binary_search_by(|(k, _)| k.as_slice().cmp(key))
                    .ok()
                    .map(|idx| entries[idx].1.clone()));
            }
            Node::Internal { keys, children } => page = children[child_index(&keys, key)],
        }
    }
}

/// Inserts or replaces `key`, returning the new root and the previous value.
pub fn insert<S: PageSink + ?Sized>(
    sink: &mut S,
    root: PageId,
    key: &[u8],
    value: &[u8],
) -> Result<(PageId, Option<Vec<u8>>)> {
    if leaf_entry_len(key, value) > max_entry_len(sink.page_size()) {
        return Err(PenumbraError::Invalid("btree entry exceeds maximum size"));
    }
    if root.is_none() {
        let leaf = Node::Leaf(vec![(key.to_vec(), value.to_vec())]);
        return Ok((store_node(sink, None, &leaf)?, None));
    }
    let mut previous = None;
    let new_root = match insert_at(sink, root, key, value, &mut previous)? {
        Insertion::Done(id) => id,
        Insertion::Split(left, separator, right) => {
            let node = Node::Internal {
                keys: vec![separator],
                children: vec![left, right],
            };
            store_node(sink, None, &node)?
        }
    };
    Ok((new_root, previous))
}

fn insert_at<S: PageSink + ?Sized>(
    sink: &mut S,
    page: PageId,
    key: &[u8],
    value: &[u8],
    previous: &mut Option<Vec<u8>>,
) -> Result<Insertion> {
    match load_node(sink, page)? {
        Node::Leaf(mut entries) => {
            match entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) {
                Ok(idx) => {
                    if entries[idx].1 == value {
                        *previous = Some(value.to_vec());
                        return Ok(Insertion::Done(page));
                    }
                    *previous = Some(std::mem::replace(&mut entries[idx].1, value.to_vec()));
                }
                Err(idx) => entries.insert(idx, (key.to_vec(), value.to_vec())),
            }
            store_or_split(sink, page, Node::Leaf(entries))
        }
        Node::Internal {
            mut keys,
            mut children,
        } => {
            let idx = child_index(&keys, key);
            let child = children[idx];
            match insert_at(sink, child, key, value, previous)? {
                Insertion::Done(id) if id == child => Ok(Insertion::Done(page)),
                Insertion::Done(id) => {
                    children[idx] = id;
                    store_or_split(sink, page, Node::Internal { keys, children })
                }
                Insertion::Split(left, separator, right) => {
                    children[idx] = left;
                    keys.insert(idx, separator);
                    children.insert(idx + 1, right);
                    store_or_split(sink, page, Node::Internal { keys, children })
                }
            }
        }
    }
}

/// Removes `key`, returning the new root and the removed value.
///
/// Emptied nodes are released and a root left with a single child is
/// collapsed; nodes are never merged.
pub fn remove<S: PageSink + ?Sized>(
    sink: &mut S,
    root: PageId,
    key: &[u8],
) -> Result<(PageId, Option<Vec<u8>>)> {
    if root.is_none() {
        return Ok((root, None));
    }
    let mut removed = None;
    let mut new_root = match remove_at(sink, root, key, &mut removed)? {
        Removal::NotFound => return Ok((root, None)),
        Removal::Emptied => PageId::NONE,
        Removal::Updated(id) => id,
    };
    while !new_root.is_none() {
        match load_node(sink, new_root)? {
            Node::Internal { children, .. } if children.len() == 1 => {
                sink.free(new_root)?;
                new_root = children[0];
            }
            _ => break,
        }
    }
    Ok((new_root, removed))
}

fn remove_at<S: PageSink + ?Sized>(
    sink: &mut S,
    page: PageId,
    key: &[u8],
    removed: &mut Option<Vec<u8>>,
) -> Result<Removal> {
    match load_node(sink, page)? {
        Node::Leaf(mut entries) => {
            let Ok(idx) = entries.binary_search_by(|(k, _)| k.as_slice().cmp(key)) else {
                return Ok(Removal::NotFound);
            };
            *removed = Some(entries.remove(idx).1);
            if entries.is_empty() {
                sink.free(page)?;
                return Ok(Removal::Emptied);
            }
            Ok(Removal::Updated(store_node(sink, Some(page), &Node::Leaf(entries))?))
        }
        Node::Internal {
            mut keys,
            mut children,
        } => {
            let idx = child_index(&keys, key);
            let child = children[idx];
            match remove_at(sink, child, key, removed)? {
                Removal::NotFound => Ok(Removal::NotFound),
                Removal::Updated(id) if id == child => Ok(Removal::Updated(page)),
                Removal::Updated(id) => {
                    children[idx] = id;
                    let node = Node::Internal { keys, children };
                    Ok(Removal::Updated(store_node(sink, Some(page), &node)?))
                }
                Removal::Emptied => {
                    children.remove(idx);
                    if !keys.is_empty() {
                        keys.remove(idx.saturating_sub(1));
                    }
                    if children.is_empty() {
                        sink.free(page)?;
                        return Ok(Removal::Emptied);
                    }
                    let node = Node::Internal { keys, children };
                    Ok(Removal::Updated(store_node(sink, Some(page), &node)?))
                }
            }
        }
    }
}

/// Releases every page of the tree rooted at `root`, returning the count.
pub fn free_tree<S: PageSink + ?Sized>(sink: &mut S, root: PageId) -> Result<u64> {
    if root.is_none() {
        return Ok(0);
    }
    let mut stack = vec![root];
    let mut freed = 0;
    while let Some(page) = stack.pop() {
        if let Node::Internal { children, .. } = load_node(sink, page)? {
            stack.extend(children);
        }
        sink.free(page)?;
        freed += 1;
    }
    Ok(freed)
}
