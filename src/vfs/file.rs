use bytes::Bytes;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::enumerator::ChildEnumerator;
use super::info::{AttributeMatcher, FileInfo, QueryFlags, query_node};
use super::path::VirtualPath;
use super::tree::{NodeId, PathTree};
use crate::archive::path_hash;
use crate::cache::{self, CacheLevel};
use crate::error::{Error, Result};
use crate::scan::scan_archive;
use crate::source::SourceHandle;
use crate::stream::ContentStream;
use crate::task::Executor;

/// Construction parameters for [`VirtualFile`].
#[derive(Debug, Clone)]
pub struct OpenOptions {
    cache_level: CacheLevel,
    path: String,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            cache_level: CacheLevel::default(),
            path: "/".to_string(),
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_level(mut self, level: CacheLevel) -> Self {
        self.cache_level = level;
        self
    }

    /// Path the new handle is positioned at.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn open(&self, source: &SourceHandle, cancel: &CancellationToken) -> Result<VirtualFile> {
        VirtualFile::open(source, self, cancel)
    }

    pub async fn open_async(
        &self,
        source: &SourceHandle,
        executor: &Executor,
        cancel: &CancellationToken,
    ) -> Result<VirtualFile> {
        VirtualFile::open_async(source, self, executor, cancel).await
    }
}

/// A file or directory inside an archive.
///
/// Handles produced by navigation (`parent`, `resolve`, `child`) share one
/// path tree; [`duplicate`](VirtualFile::duplicate) gives the new handle its
/// own copy of the tree structure. Content caches are shared either way.
pub struct VirtualFile {
    source: SourceHandle,
    cache_level: CacheLevel,
    start_offset: u64,
    tree: Arc<PathTree>,
    /// `None` for a path that did not match anything at construction.
    current: Option<NodeId>,
}

impl VirtualFile {
    /// Scan the archive in `source` and position at `options`' path.
    ///
    /// A path that is not in the archive still yields a handle, in the
    /// unresolved state: it does not exist and cannot be navigated from.
    ///
    /// # Panics
    ///
    /// Panics if the source is already driving another decode pass.
    pub fn open(
        source: &SourceHandle,
        options: &OpenOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let outcome = scan_archive(source, options.cache_level, cancel)?;
        let path = VirtualPath::parse(&options.path);
        let current = outcome.tree.find(outcome.tree.root(), path.segments()).ok();
        if current.is_none() {
            tracing::debug!("Initial path '{}' is not in the archive", path);
        }
        Ok(VirtualFile {
            source: source.clone(),
            cache_level: options.cache_level,
            start_offset: outcome.start_offset,
            tree: Arc::new(outcome.tree),
            current,
        })
    }

    /// [`open`](Self::open) with the scan running on the executor.
    pub async fn open_async(
        source: &SourceHandle,
        options: &OpenOptions,
        executor: &Executor,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let source = source.clone();
        let options = options.clone();
        executor
            .run(cancel, move |token| Self::open(&source, &options, &token))
            .await
    }

    fn at(&self, current: Option<NodeId>) -> VirtualFile {
        VirtualFile {
            source: self.source.clone(),
            cache_level: self.cache_level,
            start_offset: self.start_offset,
            tree: Arc::clone(&self.tree),
            current,
        }
    }

    /// Second handle at the same position with its own tree structure.
    /// Nothing is rescanned; node data blocks are shared.
    pub fn duplicate(&self) -> VirtualFile {
        VirtualFile {
            tree: Arc::new(self.tree.deep_copy()),
            ..self.at(self.current)
        }
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }

    pub fn cache_level(&self) -> CacheLevel {
        self.cache_level
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn exists(&self) -> bool {
        self.current.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.current == Some(self.tree.root())
    }

    fn node(&self) -> Result<NodeId> {
        self.current
            .ok_or_else(|| Error::FileNotFound("<unresolved>".to_string()))
    }

    /// Absolute path, `None` while unresolved.
    pub fn path(&self) -> Option<VirtualPath> {
        self.current.map(|id| self.tree.path_of(id))
    }

    /// Last path segment; `/` for the root.
    pub fn basename(&self) -> Option<String> {
        self.current
            .map(|id| self.tree.data(id).name().to_string())
    }

    /// The containing directory. The root and unresolved handles have none.
    pub fn parent(&self) -> Option<VirtualFile> {
        let parent = self.tree.parent(self.current?)?;
        Some(self.at(Some(parent)))
    }

    /// Resolve `path` against this handle: relative paths start here,
    /// absolute ones at the root, `.` and `..` are honoured.
    pub fn resolve(&self, path: &str) -> Result<VirtualFile> {
        let here = self
            .current
            .ok_or_else(|| Error::invalid_file("cannot resolve from an unresolved path"))?;
        let target = self.tree.path_of(here).join(path);
        let id = self.tree.find(self.tree.root(), target.segments())?;
        Ok(self.at(Some(id)))
    }

    /// Direct child by name.
    pub fn child(&self, name: &str) -> Result<VirtualFile> {
        let here = self.node()?;
        let id = self
            .tree
            .find_child(here, name)
            .ok_or_else(|| Error::FileNotFound(self.tree.path_of(here).join(name).to_string()))?;
        Ok(self.at(Some(id)))
    }

    /// Path from this handle down to `descendant`, e.g. `sub/file.txt`.
    /// `None` when `descendant` is not strictly below this handle.
    pub fn relative_path(&self, descendant: &VirtualFile) -> Option<String> {
        if !self.source.same_source(&descendant.source) {
            return None;
        }
        let segments = self
            .tree
            .relative_segments(self.current?, descendant.current?)?;
        if segments.is_empty() {
            return None;
        }
        Some(segments.join("/"))
    }

    pub fn query_info(&self, attributes: &str, flags: QueryFlags) -> Result<FileInfo> {
        let id = self.node()?;
        query_node(&self.tree, id, &AttributeMatcher::parse(attributes), flags)
    }

    /// Lazily list direct children in archive order.
    pub fn enumerate_children(&self, attributes: &str, flags: QueryFlags) -> Result<ChildEnumerator> {
        let id = self.node()?;
        if let Some(meta) = self.tree.data(id).entry() {
            if !meta.kind.is_dir() {
                return Err(Error::invalid_file(format!("'{}' is not a directory", meta.pathname)));
            }
        }
        Ok(ChildEnumerator::new(
            Arc::clone(&self.tree),
            id,
            AttributeMatcher::parse(attributes),
            flags,
        ))
    }

    /// Names of the direct children, in archive order.
    pub fn child_names(&self) -> Vec<String> {
        match self.current {
            Some(id) => self
                .tree
                .children(id)
                .map(|c| self.tree.data(c).name().to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Open the content for reading, on the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if a replay is needed while the source is driving another
    /// decode pass.
    pub fn read(&self, cancel: &CancellationToken) -> Result<ContentStream> {
        let id = self.node()?;
        cache::open_content(
            self.cache_level,
            &self.source,
            self.start_offset,
            self.tree.data(id),
            cancel,
        )
    }

    /// [`read`](Self::read) with any replay positioning done on the executor.
    pub async fn read_async(
        &self,
        executor: &Executor,
        cancel: &CancellationToken,
    ) -> Result<ContentStream> {
        let id = self.node()?;
        let data = Arc::clone(self.tree.data(id));
        let source = self.source.clone();
        let level = self.cache_level;
        let offset = self.start_offset;
        executor
            .run(cancel, move |token| {
                cache::open_content(level, &source, offset, &data, &token)
            })
            .await
    }

    /// Whole content in memory.
    pub fn read_to_bytes(&self, cancel: &CancellationToken) -> Result<Bytes> {
        let mut stream = self.read(cancel)?;
        let bytes = stream.read_to_bytes();
        stream.close();
        bytes
    }
}

/// Another handle at the same position over the same tree.
impl Clone for VirtualFile {
    fn clone(&self) -> Self {
        self.at(self.current)
    }
}

impl std::fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFile")
            .field("path", &self.path().map(|p| p.to_string()))
            .field("cache_level", &self.cache_level)
            .field("start_offset", &self.start_offset)
            .finish()
    }
}

/// Same source and the same node data block. Two unresolved handles over
/// one source are equal.
impl PartialEq for VirtualFile {
    fn eq(&self, other: &Self) -> bool {
        if !self.source.same_source(&other.source) {
            return false;
        }
        match (self.current, other.current) {
            (Some(a), Some(b)) => Arc::ptr_eq(self.tree.data(a), other.tree.data(b)),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for VirtualFile {}

impl Hash for VirtualFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let path = self.path().map(|p| p.to_string()).unwrap_or_default();
        path_hash(&path).hash(state);
    }
}

/// Capability set a virtual filesystem consumer drives.
#[async_trait::async_trait]
pub trait VfsFile: Send + Sync + Sized {
    fn duplicate(&self) -> Self;

    fn parent(&self) -> Option<Self>;

    fn query_info(&self, attributes: &str, flags: QueryFlags) -> Result<FileInfo>;

    fn enumerate_children(&self, attributes: &str, flags: QueryFlags) -> Result<ChildEnumerator>;

    async fn open_read(&self, executor: &Executor, cancel: &CancellationToken) -> Result<ContentStream>;
}

#[async_trait::async_trait]
impl VfsFile for VirtualFile {
    fn duplicate(&self) -> Self {
        VirtualFile::duplicate(self)
    }

    fn parent(&self) -> Option<Self> {
        VirtualFile::parent(self)
    }

    fn query_info(&self, attributes: &str, flags: QueryFlags) -> Result<FileInfo> {
        VirtualFile::query_info(self, attributes, flags)
    }

    fn enumerate_children(&self, attributes: &str, flags: QueryFlags) -> Result<ChildEnumerator> {
        VirtualFile::enumerate_children(self, attributes, flags)
    }

    async fn open_read(&self, executor: &Executor, cancel: &CancellationToken) -> Result<ContentStream> {
        self.read_async(executor, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fixture() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in [("a.txt", &b"hello"[..]), ("dir/b.txt", &b"bye"[..]), ("dir/sub/c", &b"c"[..])] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn open(level: CacheLevel) -> VirtualFile {
        let source = SourceHandle::seekable(Cursor::new(fixture()));
        OpenOptions::new()
            .cache_level(level)
            .open(&source, &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_navigation() {
        let root = open(CacheLevel::OnDemand);
        assert!(root.is_root());
        assert_eq!(root.path().unwrap().to_string(), "/");
        assert!(root.parent().is_none());

        let b = root.resolve("dir/b.txt").unwrap();
        assert_eq!(b.basename().as_deref(), Some("b.txt"));
        assert_eq!(b.parent().unwrap().path().unwrap().to_string(), "/dir");
        assert_eq!(b.resolve("../sub/c").unwrap().path().unwrap().to_string(), "/dir/sub/c");
        assert_eq!(b.resolve("/a.txt").unwrap(), root.child("a.txt").unwrap());
        assert!(matches!(root.resolve("/missing"), Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_relative_path() {
        let root = open(CacheLevel::OnDemand);
        let dir = root.resolve("dir").unwrap();
        let c = root.resolve("dir/sub/c").unwrap();
        assert_eq!(dir.relative_path(&c).as_deref(), Some("sub/c"));
        assert_eq!(c.relative_path(&dir), None);
        assert_eq!(dir.relative_path(&dir), None);
    }

    #[test]
    fn test_unresolved_initial_path() {
        let source = SourceHandle::seekable(Cursor::new(fixture()));
        let file = OpenOptions::new()
            .path("/nope")
            .open(&source, &CancellationToken::new())
            .unwrap();
        assert!(!file.exists());
        assert!(file.path().is_none());
        assert!(file.parent().is_none());
        assert!(matches!(file.resolve("a.txt"), Err(Error::InvalidFile(_))));
        assert!(matches!(
            file.query_info("*", QueryFlags::default()),
            Err(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_equality_compares_current_nodes() {
        let root = open(CacheLevel::OnDemand);
        let a = root.resolve("a.txt").unwrap();
        let b = root.resolve("dir/b.txt").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a.duplicate());
        assert_eq!(a, root.resolve("./a.txt").unwrap());

        let other = open(CacheLevel::OnDemand);
        assert_ne!(root, other);
    }

    #[test]
    fn test_enumerate_regular_file_is_invalid() {
        let root = open(CacheLevel::OnDemand);
        let a = root.resolve("a.txt").unwrap();
        assert!(matches!(
            a.enumerate_children("*", QueryFlags::default()),
            Err(Error::InvalidFile(_))
        ));
        assert_eq!(root.child_names(), ["a.txt", "dir"]);
    }

    #[test]
    fn test_read_each_level() {
        for level in [CacheLevel::None, CacheLevel::OnDemand, CacheLevel::Full] {
            let root = open(level);
            let b = root.resolve("dir/b.txt").unwrap();
            let cancel = CancellationToken::new();
            assert_eq!(&b.read_to_bytes(&cancel).unwrap()[..], b"bye", "{level}");
            assert_eq!(&b.read_to_bytes(&cancel).unwrap()[..], b"bye", "{level}");
            assert!(!root.source().is_in_use());
        }
    }
}
