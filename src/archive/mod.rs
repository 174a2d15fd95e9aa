pub mod adapter;
pub mod entry;
pub mod filter;
pub mod tar;

use std::fmt;
use std::io::{self, Read};

pub use adapter::{ArchiveHandle, BLOCK_SIZE};
pub use entry::{EntryMetadata, FileKind, Timestamp};

/// Native error codes reported by the bundled decoder.
pub mod errno {
    /// Miscellaneous decoder failure.
    pub const MISC: i32 = -1;
    /// Input ended early or the byte source failed.
    pub const IO: i32 = 5;
    /// Operation not supported by the decoder.
    pub const UNSUPPORTED: i32 = 38;
    /// Data is not a recognized or intact archive.
    pub const FILE_FORMAT: i32 = 84;
}

/// Error reported by a [`Decoder`], carrying its own numeric code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub code: i32,
    pub message: String,
}

impl DecodeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        DecodeError {
            code,
            message: message.into(),
        }
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::new(errno::FILE_FORMAT, message)
    }

    pub fn truncated() -> Self {
        Self::new(errno::IO, "truncated archive input")
    }

    pub fn from_io(e: &io::Error) -> Self {
        let code = e.raw_os_error().unwrap_or(errno::IO);
        Self::new(code, e.to_string())
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for DecodeError {}

/// Sequential, pull-based archive decoder.
///
/// Entries can only be visited in archive order. Content of the current
/// entry is pulled with [`read_data`](Decoder::read_data) until it returns 0;
/// calling [`next_header`](Decoder::next_header) discards whatever is left.
pub trait Decoder: Send {
    /// Advance to the next entry. `Ok(None)` marks the end of the archive.
    fn next_header(&mut self) -> Result<Option<EntryMetadata>, DecodeError>;

    /// Read content of the current entry. Returns 0 at the end of the entry.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, DecodeError>;

    fn format_name(&self) -> &'static str;

    fn filter_name(&self) -> &'static str;
}

/// A reader that can also discard bytes, possibly faster than reading them.
pub trait SkipRead: Read + Send {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        io::copy(&mut self.take(n), &mut io::sink())
    }
}

impl<T: AsRef<[u8]> + Send> SkipRead for io::Cursor<T> {}

/// Identity used to find an entry again during replay: the archive path
/// and its hash as a cheap pre-check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryIdentity {
    pub pathname: String,
    pub hash: u32,
}

impl EntryIdentity {
    pub fn new(pathname: impl Into<String>) -> Self {
        let pathname = pathname.into();
        let hash = path_hash(&pathname);
        EntryIdentity { pathname, hash }
    }

    pub fn of(meta: &EntryMetadata) -> Self {
        Self::new(meta.pathname.clone())
    }

    pub fn matches(&self, pathname: &str) -> bool {
        path_hash(pathname) == self.hash && pathname == self.pathname
    }
}

/// Stable 32-bit string hash (djb2), identical across runs and platforms.
pub fn path_hash(s: &str) -> u32 {
    s.bytes()
        .fold(5381u32, |h, b| h.wrapping_mul(33).wrapping_add(b as u32))
}
