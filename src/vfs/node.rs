use bytes::Bytes;
use std::sync::{OnceLock, RwLock};

use crate::archive::{EntryIdentity, EntryMetadata, path_hash};

/// Data block attached to a path tree node.
///
/// Blocks are shared between duplicated trees, so everything mutable here is
/// behind interior mutability: the entry metadata is set once during the scan
/// and the content cache is replaced whole, never patched in place. Two
/// handles filling the same cache concurrently both succeed; the last write
/// wins and both writes carry identical bytes.
#[derive(Debug)]
pub struct NodeData {
    name: String,
    hash: u32,
    entry: OnceLock<EntryMetadata>,
    cache: RwLock<Option<Bytes>>,
}

impl NodeData {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        NodeData {
            hash: path_hash(&name),
            name,
            entry: OnceLock::new(),
            cache: RwLock::new(None),
        }
    }

    /// The root's block: named `/`, never carries metadata.
    pub fn root() -> Self {
        Self::new("/")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Fast-reject on hash, then exact comparison.
    pub fn is_named(&self, name: &str, hash: u32) -> bool {
        self.hash == hash && self.name == name
    }

    /// Metadata of the first archive header seen for this path, if any.
    /// Nodes created only as intermediate directories have none.
    pub fn entry(&self) -> Option<&EntryMetadata> {
        self.entry.get()
    }

    /// Attach header metadata. Returns false if a header was already attached.
    pub fn set_entry(&self, meta: EntryMetadata) -> bool {
        self.entry.set(meta).is_ok()
    }

    /// Identity used to find this entry again on a replay pass.
    pub fn identity(&self) -> Option<EntryIdentity> {
        self.entry().map(EntryIdentity::of)
    }

    pub fn cached(&self) -> Option<Bytes> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn store_cache(&self, content: Bytes) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = Some(content);
    }

    pub fn has_cache(&self) -> bool {
        self.cache
            .read()
            .map(|c| c.is_some())
            .unwrap_or(false)
    }
}
