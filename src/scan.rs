//! Initial pass over the archive that builds the path tree.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveHandle, EntryMetadata, path_hash};
use crate::cache::CacheLevel;
use crate::error::{Error, Result};
use crate::source::SourceHandle;
use crate::vfs::path::VirtualPath;
use crate::vfs::tree::PathTree;

/// One archive entry as seen by the scan.
#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub path: VirtualPath,
    /// Hash of the full archive pathname.
    pub hash: u32,
    pub metadata: EntryMetadata,
    /// Content, when the scan was asked to capture it.
    pub content: Option<Bytes>,
}

/// Pulls entries from one decode pass, in archive order.
pub struct Scanner {
    handle: Option<ArchiveHandle>,
    capture_content: bool,
    seen: usize,
}

impl Scanner {
    pub fn new(handle: ArchiveHandle, capture_content: bool) -> Self {
        Scanner {
            handle: Some(handle),
            capture_content,
            seen: 0,
        }
    }

    /// Entries produced so far.
    pub fn seen(&self) -> usize {
        self.seen
    }

    fn next_record(&mut self) -> Result<Option<EntryRecord>> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };
        let Some(metadata) = handle.next_header()? else {
            return Ok(None);
        };
        let content = if self.capture_content && metadata.kind.is_regular() {
            Some(handle.read_data_to_bytes(metadata.size)?)
        } else {
            None
        };
        self.seen += 1;
        tracing::trace!(
            "Scanned '{}' ({:?}, {} bytes)",
            metadata.pathname,
            metadata.kind,
            metadata.size
        );
        Ok(Some(EntryRecord {
            path: VirtualPath::from_entry(&metadata.pathname),
            hash: path_hash(&metadata.pathname),
            metadata,
            content,
        }))
    }
}

impl Iterator for Scanner {
    type Item = Result<EntryRecord>;

    /// Stops after the end of the archive or the first error; either way the
    /// decode pass is closed at that point.
    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                if let Some(handle) = self.handle.take() {
                    handle.close();
                }
                None
            }
            Err(e) => {
                self.handle = None;
                Some(Err(e))
            }
        }
    }
}

/// Result of the initialization protocol.
#[derive(Debug)]
pub struct ScanOutcome {
    pub tree: PathTree,
    /// Source position the archive starts at; replays rewind here.
    pub start_offset: u64,
    pub entries: usize,
}

/// Scan the whole archive once and build its path tree.
///
/// None and OnDemand need a seekable source, since reads replay from the
/// start offset captured here. Full drains every regular file's content
/// into the tree and works on forward-only input.
///
/// # Panics
///
/// Panics if the source is already driving another decode pass.
pub fn scan_archive(
    source: &SourceHandle,
    level: CacheLevel,
    cancel: &CancellationToken,
) -> Result<ScanOutcome> {
    let start_offset = if level.requires_seekable() {
        if !source.can_seek() {
            return Err(Error::UnseekableInput);
        }
        source.tell()?
    } else if source.can_seek() {
        source.tell()?
    } else {
        0
    };

    let handle = ArchiveHandle::open(source, cancel)?;
    tracing::debug!(
        "Scanning archive at offset {} (format: {}, filter: {}, cache: {})",
        start_offset,
        handle.format_name(),
        handle.filter_name(),
        level
    );

    let mut tree = PathTree::new();
    let mut scanner = Scanner::new(handle, level.captures_on_scan());
    for record in scanner.by_ref() {
        let record = record?;
        insert_record(&mut tree, record);
    }

    let entries = scanner.seen();
    tracing::debug!("Scan finished: {} entries, {} nodes", entries, tree.len());
    Ok(ScanOutcome {
        tree,
        start_offset,
        entries,
    })
}

/// Attach a record to its node. The first header for a path wins.
fn insert_record(tree: &mut PathTree, record: EntryRecord) {
    if record.path.is_empty() {
        tracing::trace!("Ignoring root entry '{}'", record.metadata.pathname);
        return;
    }
    let node = tree.insert(record.path.segments());
    let data = tree.data(node);
    let pathname = record.metadata.pathname.clone();
    if !data.set_entry(record.metadata) {
        tracing::debug!("Ignoring repeated header for '{}'", pathname);
        return;
    }
    if let Some(content) = record.content {
        data.store_cache(content);
    }
}
