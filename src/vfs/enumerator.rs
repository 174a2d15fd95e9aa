use std::sync::Arc;

use super::info::{AttributeMatcher, FileInfo, QueryFlags, query_node};
use super::tree::{NodeId, PathTree};
use crate::error::Result;

/// Lazy, single-pass listing of a node's direct children in scan order.
///
/// Each item is projected when it is pulled. A child that never had an
/// archive header of its own yields `Err(InvalidFile)` for that item; the
/// caller decides whether to keep going.
pub struct ChildEnumerator {
    tree: Arc<PathTree>,
    next: Option<NodeId>,
    matcher: AttributeMatcher,
    flags: QueryFlags,
}

impl ChildEnumerator {
    pub(crate) fn new(
        tree: Arc<PathTree>,
        parent: NodeId,
        matcher: AttributeMatcher,
        flags: QueryFlags,
    ) -> Self {
        let next = tree.first_child(parent);
        ChildEnumerator {
            tree,
            next,
            matcher,
            flags,
        }
    }

    /// Name of the child the next call to `next` will project.
    pub fn peek_name(&self) -> Option<&str> {
        self.next.map(|id| self.tree.data(id).name())
    }
}

impl Iterator for ChildEnumerator {
    type Item = Result<FileInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.tree.next_sibling(current);
        Some(query_node(&self.tree, current, &self.matcher, self.flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{EntryMetadata, FileKind};
    use crate::error::Error;
    use crate::vfs::path::VirtualPath;

    fn tree_with(paths: &[&str]) -> PathTree {
        let mut tree = PathTree::new();
        for path in paths {
            let id = tree.resolve(&VirtualPath::parse(path), true).unwrap();
            tree.data(id)
                .set_entry(EntryMetadata::new(*path, FileKind::Regular, 1));
        }
        tree
    }

    #[test]
    fn test_lists_in_scan_order() {
        let tree = Arc::new(tree_with(&["c", "a", "b"]));
        let root = tree.root();
        let names: Vec<String> = ChildEnumerator::new(tree, root, AttributeMatcher::all(), QueryFlags::default())
            .map(|info| info.unwrap().name().unwrap().to_string())
            .collect();
        assert_eq!(names, ["c", "a", "b"]);
    }

    #[test]
    fn test_metadata_less_child_is_an_item_error() {
        let tree = Arc::new(tree_with(&["first", "dir/inner", "last"]));
        let root = tree.root();
        let mut children =
            ChildEnumerator::new(tree, root, AttributeMatcher::parse("standard::name"), QueryFlags::default());

        assert!(children.next().unwrap().is_ok());
        assert_eq!(children.peek_name(), Some("dir"));
        assert!(matches!(children.next(), Some(Err(Error::InvalidFile(_)))));
        assert_eq!(children.next().unwrap().unwrap().name(), Some("last"));
        assert!(children.next().is_none());
        assert!(children.next().is_none());
    }

    #[test]
    fn test_leaf_has_no_children() {
        let tree = Arc::new(tree_with(&["only"]));
        let leaf = tree.find_child(tree.root(), "only").unwrap();
        let mut children = ChildEnumerator::new(tree, leaf, AttributeMatcher::all(), QueryFlags::default());
        assert!(children.next().is_none());
    }
}
