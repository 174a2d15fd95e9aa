//! Arena-backed path tree.
//!
//! Nodes live in one `Vec` and link to each other by index (parent, first and
//! last child, previous and next sibling), so the parent/sibling back-links
//! never form ownership cycles. Children stay in the order they were first
//! seen while scanning.

use std::sync::Arc;

use super::node::NodeData;
use super::path::VirtualPath;
use crate::archive::path_hash;
use crate::error::{Error, Result};

/// Stable handle to a node within one [`PathTree`] and its deep copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Node {
    data: Arc<NodeData>,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

impl Node {
    fn new(data: Arc<NodeData>, parent: Option<NodeId>) -> Self {
        Node {
            data,
            parent,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
        }
    }
}

#[derive(Debug)]
pub struct PathTree {
    nodes: Vec<Node>,
}

impl Default for PathTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTree {
    pub fn new() -> Self {
        PathTree {
            nodes: vec![Node::new(Arc::new(NodeData::root()), None)],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn data(&self, id: NodeId) -> &Arc<NodeData> {
        &self.node(id).data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next_sibling
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev_sibling
    }

    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            next: self.first_child(id),
        }
    }

    /// Linear scan of `parent`'s children, comparing hashes before names.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let hash = path_hash(name);
        self.children(parent)
            .find(|&child| self.data(child).is_named(name, hash))
    }

    /// Walk `segments` down from `start` without creating anything.
    pub fn find(&self, start: NodeId, segments: &[String]) -> Result<NodeId> {
        let mut current = start;
        for (depth, segment) in segments.iter().enumerate() {
            current = self.find_child(current, segment).ok_or_else(|| {
                Error::FileNotFound(VirtualPath::from_segments(segments[..=depth].to_vec()).to_string())
            })?;
        }
        Ok(current)
    }

    /// Walk `segments` from the root, appending missing nodes as needed.
    pub fn insert(&mut self, segments: &[String]) -> NodeId {
        let mut current = self.root();
        for segment in segments {
            current = match self.find_child(current, segment) {
                Some(child) => child,
                None => self.append_child(current, Arc::new(NodeData::new(segment.clone()))),
            };
        }
        current
    }

    /// Resolve a path from the root, optionally creating missing segments.
    pub fn resolve(&mut self, path: &VirtualPath, create_missing: bool) -> Result<NodeId> {
        if create_missing {
            Ok(self.insert(path.segments()))
        } else {
            self.find(self.root(), path.segments())
        }
    }

    fn append_child(&mut self, parent: NodeId, data: Arc<NodeData>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut node = Node::new(data, Some(parent));
        node.prev_sibling = self.nodes[parent.0].last_child;
        self.nodes.push(node);

        match self.nodes[parent.0].last_child {
            Some(last) => self.nodes[last.0].next_sibling = Some(id),
            None => self.nodes[parent.0].first_child = Some(id),
        }
        self.nodes[parent.0].last_child = Some(id);
        id
    }

    /// Absolute path of a node.
    pub fn path_of(&self, id: NodeId) -> VirtualPath {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            if self.parent(node).is_some() {
                segments.push(self.data(node).name().to_string());
            }
            cursor = self.parent(node);
        }
        segments.reverse();
        VirtualPath::from_segments(segments)
    }

    /// Segments leading from `ancestor` down to `node`, or `None` if `node`
    /// is not below `ancestor`.
    pub fn relative_segments(&self, ancestor: NodeId, node: NodeId) -> Option<Vec<String>> {
        let mut segments = Vec::new();
        let mut cursor = node;
        while cursor != ancestor {
            segments.push(self.data(cursor).name().to_string());
            cursor = self.parent(cursor)?;
        }
        segments.reverse();
        Some(segments)
    }

    /// A structurally independent copy whose nodes share this tree's data
    /// blocks. Node ids stay valid across the copy.
    pub fn deep_copy(&self) -> PathTree {
        PathTree {
            nodes: self
                .nodes
                .iter()
                .map(|node| Node {
                    data: Arc::clone(&node.data),
                    ..node.clone()
                })
                .collect(),
        }
    }
}

/// Direct children of a node, in scan order.
pub struct Children<'a> {
    tree: &'a PathTree,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.tree.next_sibling(current);
        Some(current)
    }
}
