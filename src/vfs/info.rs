use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::path::VirtualPath;
use super::tree::{NodeId, PathTree};
use crate::archive::{EntryMetadata, FileKind, Timestamp};
use crate::error::{Error, Result};

pub const STANDARD_NAME: &str = "standard::name";
pub const STANDARD_DISPLAY_NAME: &str = "standard::display-name";
pub const STANDARD_EDIT_NAME: &str = "standard::edit-name";
pub const STANDARD_COPY_NAME: &str = "standard::copy-name";
pub const STANDARD_TYPE: &str = "standard::type";
pub const STANDARD_SIZE: &str = "standard::size";
pub const STANDARD_ALLOCATED_SIZE: &str = "standard::allocated-size";
pub const STANDARD_IS_SYMLINK: &str = "standard::is-symlink";
pub const STANDARD_SYMLINK_TARGET: &str = "standard::symlink-target";
pub const STANDARD_IS_HIDDEN: &str = "standard::is-hidden";
pub const STANDARD_IS_BACKUP: &str = "standard::is-backup";
pub const STANDARD_IS_VIRTUAL: &str = "standard::is-virtual";
pub const STANDARD_IS_VOLATILE: &str = "standard::is-volatile";
pub const STANDARD_CONTENT_TYPE: &str = "standard::content-type";
pub const UNIX_MODE: &str = "unix::mode";
pub const UNIX_UID: &str = "unix::uid";
pub const UNIX_GID: &str = "unix::gid";
pub const OWNER_USER: &str = "owner::user";
pub const OWNER_GROUP: &str = "owner::group";
pub const TIME_ACCESS: &str = "time::access";
pub const TIME_CHANGED: &str = "time::changed";
pub const TIME_CREATED: &str = "time::created";
pub const TIME_MODIFIED: &str = "time::modified";

/// How many symlink hops are followed before giving up.
const MAX_SYMLINK_DEPTH: usize = 8;

/// Options for metadata queries and enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags {
    /// Report symlinks themselves instead of what they point to.
    pub nofollow_symlinks: bool,
}

impl QueryFlags {
    pub fn nofollow() -> Self {
        QueryFlags {
            nofollow_symlinks: true,
        }
    }
}

/// Parsed attribute filter, e.g. `standard::name,unix::*` or `*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeMatcher {
    all: bool,
    namespaces: Vec<String>,
    attributes: Vec<String>,
}

impl AttributeMatcher {
    pub fn parse(attributes: &str) -> Self {
        let mut matcher = AttributeMatcher::default();
        for item in attributes.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if item == "*" {
                matcher.all = true;
            } else if let Some(ns) = item.strip_suffix("::*") {
                matcher.namespaces.push(ns.to_string());
            } else {
                matcher.attributes.push(item.to_string());
            }
        }
        matcher
    }

    pub fn all() -> Self {
        AttributeMatcher {
            all: true,
            ..Default::default()
        }
    }

    pub fn matches(&self, attribute: &str) -> bool {
        if self.all || self.attributes.iter().any(|a| a == attribute) {
            return true;
        }
        match attribute.split_once("::") {
            Some((ns, _)) => self.namespaces.iter().any(|n| n == ns),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    String(String),
    Bool(bool),
    U32(u32),
    U64(u64),
    Kind(FileKind),
}

/// Metadata of one virtual file, restricted to the attributes that were
/// asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    attributes: BTreeMap<String, AttributeValue>,
}

impl FileInfo {
    pub fn get(&self, attribute: &str) -> Option<&AttributeValue> {
        self.attributes.get(attribute)
    }

    pub fn has(&self, attribute: &str) -> bool {
        self.attributes.contains_key(attribute)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    fn string(&self, attribute: &str) -> Option<&str> {
        match self.get(attribute) {
            Some(AttributeValue::String(s)) => Some(s),
            _ => None,
        }
    }

    fn flag(&self, attribute: &str) -> bool {
        matches!(self.get(attribute), Some(AttributeValue::Bool(true)))
    }

    fn u64(&self, attribute: &str) -> Option<u64> {
        match self.get(attribute) {
            Some(AttributeValue::U64(v)) => Some(*v),
            Some(AttributeValue::U32(v)) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.string(STANDARD_NAME)
    }

    pub fn display_name(&self) -> Option<&str> {
        self.string(STANDARD_DISPLAY_NAME)
    }

    pub fn file_kind(&self) -> Option<FileKind> {
        match self.get(STANDARD_TYPE) {
            Some(AttributeValue::Kind(kind)) => Some(*kind),
            _ => None,
        }
    }

    pub fn size(&self) -> Option<u64> {
        self.u64(STANDARD_SIZE)
    }

    pub fn is_symlink(&self) -> bool {
        self.flag(STANDARD_IS_SYMLINK)
    }

    pub fn symlink_target(&self) -> Option<&str> {
        self.string(STANDARD_SYMLINK_TARGET)
    }

    pub fn is_hidden(&self) -> bool {
        self.flag(STANDARD_IS_HIDDEN)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.string(STANDARD_CONTENT_TYPE)
    }

    pub fn mode(&self) -> Option<u32> {
        self.u64(UNIX_MODE).and_then(|m| u32::try_from(m).ok())
    }

    pub fn user(&self) -> Option<&str> {
        self.string(OWNER_USER)
    }

    pub fn group(&self) -> Option<&str> {
        self.string(OWNER_GROUP)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.time(TIME_MODIFIED)
    }

    /// A `time::*` attribute together with its `-nsec` companion.
    pub fn time(&self, attribute: &str) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.u64(attribute)?).ok()?;
        let nsecs = self
            .u64(&format!("{attribute}-nsec"))
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0);
        DateTime::from_timestamp(secs, nsecs)
    }
}

/// Collects attributes, skipping the ones the matcher rejects.
struct Projection<'a> {
    matcher: &'a AttributeMatcher,
    info: FileInfo,
}

impl Projection<'_> {
    fn set(&mut self, attribute: &str, value: impl FnOnce() -> AttributeValue) {
        if self.matcher.matches(attribute) {
            self.info.attributes.insert(attribute.to_string(), value());
        }
    }

    fn set_time(&mut self, attribute: &str, time: Option<Timestamp>) {
        let Some(time) = time else { return };
        let Ok(secs) = u64::try_from(time.secs) else {
            return;
        };
        self.set(attribute, || AttributeValue::U64(secs));
        self.set(&format!("{attribute}-nsec"), || AttributeValue::U32(time.nsecs));
    }
}

/// Project entry metadata into a [`FileInfo`].
///
/// `target` is the entry a symlink resolved to, if it was followed; its type
/// and size replace the link's own while name and link target stay.
pub fn project(
    name: &str,
    meta: &EntryMetadata,
    target: Option<&EntryMetadata>,
    matcher: &AttributeMatcher,
) -> FileInfo {
    let mut p = Projection {
        matcher,
        info: FileInfo::default(),
    };
    let effective = target.unwrap_or(meta);
    let is_symlink = meta.kind == FileKind::Symlink;

    p.set(STANDARD_NAME, || AttributeValue::String(name.to_string()));
    p.set(STANDARD_DISPLAY_NAME, || AttributeValue::String(name.to_string()));
    p.set(STANDARD_EDIT_NAME, || AttributeValue::String(name.to_string()));
    p.set(STANDARD_COPY_NAME, || AttributeValue::String(name.to_string()));
    p.set(STANDARD_TYPE, || AttributeValue::Kind(effective.kind));
    p.set(STANDARD_SIZE, || AttributeValue::U64(effective.size));
    p.set(STANDARD_ALLOCATED_SIZE, || AttributeValue::U64(effective.size));
    p.set(STANDARD_IS_SYMLINK, || AttributeValue::Bool(is_symlink));
    if let Some(link) = &meta.symlink_target {
        p.set(STANDARD_SYMLINK_TARGET, || AttributeValue::String(link.clone()));
    }
    p.set(STANDARD_IS_HIDDEN, || AttributeValue::Bool(name.starts_with('.')));
    p.set(STANDARD_IS_BACKUP, || AttributeValue::Bool(name.ends_with('~')));
    p.set(STANDARD_IS_VIRTUAL, || AttributeValue::Bool(true));
    p.set(STANDARD_IS_VOLATILE, || AttributeValue::Bool(false));
    p.set(STANDARD_CONTENT_TYPE, || {
        AttributeValue::String(content_type(name, effective.kind).to_string())
    });

    p.set(UNIX_MODE, || AttributeValue::U32(unix_mode(effective)));
    p.set(UNIX_UID, || AttributeValue::U64(meta.uid));
    p.set(UNIX_GID, || AttributeValue::U64(meta.gid));
    if let Some(user) = &meta.user {
        p.set(OWNER_USER, || AttributeValue::String(user.clone()));
    }
    if let Some(group) = &meta.group {
        p.set(OWNER_GROUP, || AttributeValue::String(group.clone()));
    }

    p.set_time(TIME_ACCESS, meta.accessed);
    p.set_time(TIME_CHANGED, meta.changed);
    p.set_time(TIME_CREATED, meta.created);
    p.set_time(TIME_MODIFIED, meta.modified);

    p.info
}

/// Info for the tree root, which never carries an archive header.
pub fn root_info(matcher: &AttributeMatcher) -> FileInfo {
    let mut meta = EntryMetadata::new("/", FileKind::Directory, 0);
    meta.mode = 0o755;
    project("/", &meta, None, matcher)
}

/// Project the node `id` of `tree`.
///
/// Fails with `InvalidFile` for nodes that only exist as intermediate
/// directories of some other entry's path.
pub fn query_node(
    tree: &PathTree,
    id: NodeId,
    matcher: &AttributeMatcher,
    flags: QueryFlags,
) -> Result<FileInfo> {
    if id == tree.root() {
        return Ok(root_info(matcher));
    }
    let data = tree.data(id);
    let meta = data.entry().ok_or_else(|| {
        Error::invalid_file(format!("{} has no archive entry", tree.path_of(id)))
    })?;
    let target = if flags.nofollow_symlinks {
        None
    } else {
        follow_symlink(tree, id)
    };
    Ok(project(data.name(), meta, target, matcher))
}

/// Resolve a symlink node to the entry it finally points at, if that entry
/// is inside the archive.
pub fn follow_symlink(tree: &PathTree, id: NodeId) -> Option<&EntryMetadata> {
    let mut current = id;
    for _ in 0..MAX_SYMLINK_DEPTH {
        let meta = tree.data(current).entry()?;
        if meta.kind != FileKind::Symlink {
            return (current != id).then_some(meta);
        }
        let link = meta.symlink_target.as_deref()?;
        let base = tree
            .parent(current)
            .map(|p| tree.path_of(p))
            .unwrap_or_else(VirtualPath::root);
        let resolved = base.join(link);
        current = tree.find(tree.root(), resolved.segments()).ok()?;
    }
    None
}

fn unix_mode(meta: &EntryMetadata) -> u32 {
    let type_bits = match meta.kind {
        FileKind::Directory => 0o040000,
        FileKind::Symlink => 0o120000,
        FileKind::CharDevice => 0o020000,
        FileKind::BlockDevice => 0o060000,
        FileKind::Fifo => 0o010000,
        FileKind::Regular | FileKind::HardLink => 0o100000,
        FileKind::Unknown => 0,
    };
    type_bits | (meta.mode & 0o7777)
}

fn content_type(name: &str, kind: FileKind) -> &'static str {
    match kind {
        FileKind::Directory => return "inode/directory",
        FileKind::Symlink => return "inode/symlink",
        FileKind::CharDevice => return "inode/chardevice",
        FileKind::BlockDevice => return "inode/blockdevice",
        FileKind::Fifo => return "inode/fifo",
        _ => {}
    }
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "js" => "application/javascript",
        "rs" => "text/rust",
        "c" | "h" => "text/x-c",
        "py" => "text/x-python",
        "sh" => "application/x-shellscript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "gz" => "application/gzip",
        "bz2" => "application/x-bzip2",
        "tar" => "application/x-tar",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64) -> EntryMetadata {
        let mut m = EntryMetadata::new(path, FileKind::Regular, size);
        m.mode = 0o644;
        m.modified = Some(Timestamp {
            secs: 1_700_000_000,
            nsecs: 250,
        });
        m
    }

    #[test]
    fn test_matcher_forms() {
        let m = AttributeMatcher::parse("standard::name, unix::*");
        assert!(m.matches(STANDARD_NAME));
        assert!(m.matches(UNIX_MODE));
        assert!(!m.matches(STANDARD_SIZE));
        assert!(AttributeMatcher::parse("*").matches(TIME_MODIFIED));
        assert!(!AttributeMatcher::parse("").matches(STANDARD_NAME));
    }

    #[test]
    fn test_projection_honors_filter() {
        let info = project(
            "a.txt",
            &file("a.txt", 5),
            None,
            &AttributeMatcher::parse("standard::name,standard::size"),
        );
        assert_eq!(info.len(), 2);
        assert_eq!(info.name(), Some("a.txt"));
        assert_eq!(info.size(), Some(5));
        assert_eq!(info.file_kind(), None);
    }

    #[test]
    fn test_full_projection() {
        let info = project(".hidden.txt", &file(".hidden.txt", 3), None, &AttributeMatcher::all());
        assert_eq!(info.file_kind(), Some(FileKind::Regular));
        assert!(info.is_hidden());
        assert!(!info.is_symlink());
        assert_eq!(info.mode(), Some(0o100644));
        assert_eq!(info.content_type(), Some("text/plain"));
        assert_eq!(info.get(STANDARD_IS_VIRTUAL), Some(&AttributeValue::Bool(true)));
        let modified = info.modified().unwrap();
        assert_eq!(modified.timestamp(), 1_700_000_000);
        assert_eq!(modified.timestamp_subsec_nanos(), 250);
    }

    #[test]
    fn test_symlink_follow_and_nofollow() {
        let mut tree = PathTree::new();
        let target = tree.resolve(&VirtualPath::parse("/dir/real.txt"), true).unwrap();
        tree.data(target).set_entry(file("dir/real.txt", 42));

        let link = tree.resolve(&VirtualPath::parse("/dir/link"), true).unwrap();
        let mut meta = EntryMetadata::new("dir/link", FileKind::Symlink, 0);
        meta.symlink_target = Some("real.txt".into());
        tree.data(link).set_entry(meta);

        let followed = query_node(&tree, link, &AttributeMatcher::all(), QueryFlags::default()).unwrap();
        assert_eq!(followed.file_kind(), Some(FileKind::Regular));
        assert_eq!(followed.size(), Some(42));
        assert!(followed.is_symlink());
        assert_eq!(followed.symlink_target(), Some("real.txt"));

        let raw = query_node(&tree, link, &AttributeMatcher::all(), QueryFlags::nofollow()).unwrap();
        assert_eq!(raw.file_kind(), Some(FileKind::Symlink));
        assert_eq!(raw.size(), Some(0));
    }

    #[test]
    fn test_symlink_loop_is_not_followed() {
        let mut tree = PathTree::new();
        for (name, to) in [("a", "b"), ("b", "a")] {
            let id = tree.resolve(&VirtualPath::parse(name), true).unwrap();
            let mut meta = EntryMetadata::new(name, FileKind::Symlink, 0);
            meta.symlink_target = Some(to.into());
            tree.data(id).set_entry(meta);
        }
        let a = tree.find_child(tree.root(), "a").unwrap();
        assert!(follow_symlink(&tree, a).is_none());
    }

    #[test]
    fn test_metadata_less_node_is_invalid() {
        let mut tree = PathTree::new();
        let dir = tree.resolve(&VirtualPath::parse("/dir/b.txt"), true).unwrap();
        let dir = tree.parent(dir).unwrap();
        let err = query_node(&tree, dir, &AttributeMatcher::all(), QueryFlags::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidFile(_)));

        let root = query_node(&tree, tree.root(), &AttributeMatcher::all(), QueryFlags::default()).unwrap();
        assert_eq!(root.file_kind(), Some(FileKind::Directory));
    }
}
