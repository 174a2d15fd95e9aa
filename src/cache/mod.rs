use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::source::SourceHandle;
use crate::stream::{ContentStream, ReplayStream};
use crate::vfs::node::NodeData;

/// When entry content is materialized and kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CacheLevel {
    /// Keep metadata only; every read replays the archive.
    None,
    /// Keep metadata; the first read of an entry replays and memoizes it.
    #[default]
    OnDemand,
    /// Materialize every regular file during the scan; never replay.
    Full,
}

impl CacheLevel {
    /// Whether reads may need to rewind the byte source later.
    pub fn requires_seekable(self) -> bool {
        !matches!(self, CacheLevel::Full)
    }

    /// Whether the scan drains content into the tree.
    pub fn captures_on_scan(self) -> bool {
        matches!(self, CacheLevel::Full)
    }
}

impl fmt::Display for CacheLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheLevel::None => "none",
            CacheLevel::OnDemand => "on-demand",
            CacheLevel::Full => "full",
        })
    }
}

impl FromStr for CacheLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CacheLevel::None),
            "on-demand" | "ondemand" => Ok(CacheLevel::OnDemand),
            "full" => Ok(CacheLevel::Full),
            other => Err(format!(
                "unknown cache level '{other}' (expected none, on-demand or full)"
            )),
        }
    }
}

/// Open the content of the entry behind `data` according to `level`.
///
/// Only regular files have content; anything else, including nodes that
/// never had a header, is `InvalidFile` at every level.
pub(crate) fn open_content(
    level: CacheLevel,
    source: &SourceHandle,
    start_offset: u64,
    data: &NodeData,
    cancel: &CancellationToken,
) -> Result<ContentStream> {
    let meta = data
        .entry()
        .ok_or_else(|| Error::invalid_file(format!("'{}' has no archive entry", data.name())))?;
    if meta.kind.is_special() {
        return Err(Error::invalid_file(format!(
            "'{}' is a device or fifo",
            meta.pathname
        )));
    }
    if !meta.kind.is_regular() {
        return Err(Error::invalid_file(format!(
            "'{}' is not a regular file",
            meta.pathname
        )));
    }

    match level {
        CacheLevel::None => {
            let target = data.identity().ok_or_else(|| Error::invalid_file(data.name()))?;
            let stream = ReplayStream::open(source, start_offset, target, cancel)?;
            Ok(ContentStream::Replay(stream))
        }
        CacheLevel::OnDemand => {
            if let Some(bytes) = data.cached() {
                return Ok(ContentStream::from_bytes(bytes));
            }
            let target = data.identity().ok_or_else(|| Error::invalid_file(data.name()))?;
            let mut stream = ReplayStream::open(source, start_offset, target, cancel)?;
            let bytes = stream.read_to_bytes()?;
            stream.close();
            tracing::debug!("Memoized {} bytes for '{}'", bytes.len(), meta.pathname);
            data.store_cache(bytes.clone());
            Ok(ContentStream::from_bytes(bytes))
        }
        CacheLevel::Full => data
            .cached()
            .map(ContentStream::from_bytes)
            .ok_or_else(|| Error::invalid_file(format!("no cached content for '{}'", meta.pathname))),
    }
}
