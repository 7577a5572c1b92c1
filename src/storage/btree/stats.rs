use serde::Serialize;

use crate::primitives::pager::PageSource;
use crate::types::{PageId, Result};

use super::node::Node;
use super::tree::load_node;

/// Shape of a B+ tree, gathered by walking every page.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TreeShape {
    /// Number of levels; zero for an empty tree.
    pub depth: u32,
    /// Number of leaf pages.
    pub leaf_pages: u64,
    /// Number of internal pages.
    pub internal_pages: u64,
    /// Number of entries stored in leaves.
    pub entries: u64,
}

impl TreeShape {
    /// Total pages owned by the tree.
    pub fn pages(&self) -> u64 {
        self.leaf_pages + self.internal_pages
    }
}

/// Walks the tree rooted at `root` and reports its shape.
pub fn tree_shape<S: PageSource + ?Sized>(src: &S, root: PageId) -> Result<TreeShape> {
    let mut shape = TreeShape::default();
    if root.is_none() {
        return Ok(shape);
    }
    let mut stack = vec![(root, 1u32)];
    while let Some((page, level)) = stack.pop() {
        shape.depth = shape.depth.max(level);
        match load_node(src, page)? {
            Node::Leaf(entries) => {
                shape.leaf_pages += 1;
                shape.entries += entries.len() as u64;
            }
            Node::Internal { children, .. } => {
                shape.internal_pages += 1;
                stack.extend(children.into_iter().map(|c| (c, level + 1)));
            }
        }
    }
    Ok(shape)
}
