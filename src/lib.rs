//! Browse a tar archive as a virtual filesystem.
//!
//! The archive is scanned once into a path tree. Content is then served
//! from memory or, for archives read through a forward-only decoder, by
//! replaying the decode from the archive's start up to the wanted entry.
//! [`CacheLevel`] picks the trade-off between the two.

pub mod archive;
pub mod cache;
pub mod error;
pub mod scan;
pub mod shell;
pub mod source;
pub mod stream;
pub mod task;
pub mod vfs;

pub use cache::CacheLevel;
pub use error::{ARCHIVE_ERROR_BASE, Error, ErrorCode, Result};
pub use source::{ByteSource, SeekableSource, SequentialSource, SourceHandle};
pub use stream::{ContentStream, ReplayStream};
pub use task::Executor;
pub use vfs::{
    AttributeMatcher, ChildEnumerator, FileInfo, OpenOptions, QueryFlags, VfsFile, VirtualFile,
    VirtualPath,
};

pub use tokio_util::sync::CancellationToken;
