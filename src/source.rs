use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A readable byte source the archive is decoded from.
///
/// Seeking is optional. Sources that cannot seek only support a single
/// forward pass, which is enough for [`CacheLevel::Full`](crate::CacheLevel).
pub trait ByteSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard up to `n` bytes, returning how many were actually skipped.
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let mut limited = ReadAdapter(self).take(n);
        io::copy(&mut limited, &mut io::sink())
    }

    fn can_seek(&self) -> bool {
        false
    }

    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "source does not support seeking",
        ))
    }

    fn tell(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::Current(0))
    }
}

struct ReadAdapter<'a, S: ?Sized>(&'a mut S);

impl<S: ByteSource + ?Sized> Read for ReadAdapter<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// Byte source over anything `Read + Seek`, e.g. a file or an in-memory cursor.
pub struct SeekableSource<R> {
    inner: R,
}

impl<R: Read + Seek + Send> SeekableSource<R> {
    pub fn new(inner: R) -> Self {
        SeekableSource { inner }
    }
}

impl<R: Read + Seek + Send> ByteSource for SeekableSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn skip(&mut self, n: u64) -> io::Result<u64> {
        let here = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        let target = here.saturating_add(n).min(end.max(here));
        self.inner.seek(SeekFrom::Start(target))?;
        Ok(target - here)
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// Forward-only byte source, e.g. a pipe or a decompressing reader.
pub struct SequentialSource<R> {
    inner: R,
}

impl<R: Read + Send> SequentialSource<R> {
    pub fn new(inner: R) -> Self {
        SequentialSource { inner }
    }
}

impl<R: Read + Send> ByteSource for SequentialSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

struct Shared {
    in_use: AtomicBool,
    seekable: bool,
    io: Mutex<Box<dyn ByteSource>>,
}

/// Shared, cloneable handle to a byte source.
///
/// At most one decode pass may drive a source at a time; see [`SourceLease`].
#[derive(Clone)]
pub struct SourceHandle {
    shared: Arc<Shared>,
}

impl SourceHandle {
    pub fn new(source: Box<dyn ByteSource>) -> Self {
        let seekable = source.can_seek();
        SourceHandle {
            shared: Arc::new(Shared {
                in_use: AtomicBool::new(false),
                seekable,
                io: Mutex::new(source),
            }),
        }
    }

    pub fn seekable<R: Read + Seek + Send + 'static>(inner: R) -> Self {
        Self::new(Box::new(SeekableSource::new(inner)))
    }

    pub fn sequential<R: Read + Send + 'static>(inner: R) -> Self {
        Self::new(Box::new(SequentialSource::new(inner)))
    }

    pub fn open_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::seekable(File::open(path)?))
    }

    pub fn can_seek(&self) -> bool {
        self.shared.seekable
    }

    /// Whether a decode pass currently holds this source.
    pub fn is_in_use(&self) -> bool {
        self.shared.in_use.load(Ordering::Acquire)
    }

    /// Identity comparison: both handles refer to the same underlying source.
    pub fn same_source(&self, other: &SourceHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn tell(&self) -> io::Result<u64> {
        self.lock().tell()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn ByteSource>> {
        self.shared.io.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle")
            .field("seekable", &self.shared.seekable)
            .field("in_use", &self.is_in_use())
            .finish()
    }
}

/// Exclusive claim on a source for one decode pass. Dropping it releases
/// the in-use mark.
#[derive(Debug)]
pub struct SourceLease {
    source: SourceHandle,
}

impl SourceLease {
    /// Mark the source in use.
    ///
    /// # Panics
    ///
    /// Panics if another decode pass already holds the source. Two passes
    /// interleaving reads on one source would silently corrupt both.
    pub fn acquire(source: &SourceHandle) -> Self {
        if source.shared.in_use.swap(true, Ordering::AcqRel) {
            panic!("attempt to open a byte source which is already in use");
        }
        SourceLease {
            source: source.clone(),
        }
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        self.source.shared.in_use.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_lease_marks_and_releases() {
        let source = SourceHandle::seekable(Cursor::new(vec![0u8; 16]));
        assert!(!source.is_in_use());
        {
            let _lease = SourceLease::acquire(&source);
            assert!(source.is_in_use());
        }
        assert!(!source.is_in_use());
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn test_second_lease_is_fatal() {
        let source = SourceHandle::sequential(Cursor::new(vec![0u8; 16]));
        let _first = SourceLease::acquire(&source);
        let _second = SourceLease::acquire(&source);
    }

    #[test]
    fn test_sequential_skip_discards() {
        let mut src = SequentialSource::new(Cursor::new((0u8..10).collect::<Vec<_>>()));
        assert_eq!(src.skip(4).unwrap(), 4);
        let mut buf = [0u8; 2];
        src.read(&mut buf).unwrap();
        assert_eq!(buf, [4, 5]);
        assert_eq!(src.skip(100).unwrap(), 4);
        assert!(src.seek(SeekFrom::Start(0)).is_err());
    }

    #[test]
    fn test_seekable_skip_clamps_to_end() {
        let mut src = SeekableSource::new(Cursor::new(vec![1u8; 10]));
        assert_eq!(src.skip(3).unwrap(), 3);
        assert_eq!(src.skip(50).unwrap(), 7);
        assert_eq!(src.tell().unwrap(), 10);
    }
}
