//! Content streams handed out by [`VirtualFile::read`](crate::VirtualFile::read).

use bytes::Bytes;
use futures::stream::{self, Stream};
use std::io::{self, Cursor, Read};
use tokio_util::sync::CancellationToken;

use crate::archive::{ArchiveHandle, BLOCK_SIZE, EntryIdentity};
use crate::error::{Error, Result};
use crate::source::SourceHandle;
use crate::task::Executor;

/// Random access to one entry, synthesized by decoding the archive again
/// from its start offset up to the entry.
///
/// Opening the stream does the positioning; once open it streams the entry
/// content forward. Any failure closes it, which releases the byte source.
pub struct ReplayStream {
    handle: Option<ArchiveHandle>,
    target: EntryIdentity,
    size: u64,
    position: u64,
}

impl ReplayStream {
    /// Rewind `source` to `start_offset` and decode forward until `target`.
    ///
    /// # Panics
    ///
    /// Panics if the source is already driving another decode pass.
    pub fn open(
        source: &SourceHandle,
        start_offset: u64,
        target: EntryIdentity,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        if !source.can_seek() {
            return Err(Error::UnseekableInput);
        }
        let mut handle = ArchiveHandle::open_at(source, start_offset, cancel)?;
        let meta = handle.skip_to_entry(&target)?;
        Ok(ReplayStream {
            handle: Some(handle),
            target,
            size: meta.size,
            position: 0,
        })
    }

    /// [`open`](Self::open) on the executor's blocking pool.
    pub async fn open_async(
        executor: &Executor,
        source: SourceHandle,
        start_offset: u64,
        target: EntryIdentity,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        executor
            .run(cancel, move |token| Self::open(&source, start_offset, target, &token))
            .await
    }

    pub fn target(&self) -> &EntryIdentity {
        &self.target
    }

    /// Entry size as reported by its header.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes of content consumed so far, read or skipped.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Switch the token consulted at the decoder's next checkpoints.
    pub fn set_cancellable(&self, cancel: &CancellationToken) {
        if let Some(handle) = &self.handle {
            handle.set_cancellable(cancel);
        }
    }

    fn handle_mut(&mut self) -> Result<&mut ArchiveHandle> {
        self.handle
            .as_mut()
            .ok_or_else(|| Error::Failed(format!("stream for '{}' is closed", self.target.pathname)))
    }

    /// Read the next chunk of content. Returns 0 at the end of the entry.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let result = self.handle_mut()?.read_data(buf);
        match result {
            Ok(n) => {
                self.position += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Discard up to `n` bytes by decoding and dropping them.
    pub fn skip(&mut self, n: u64) -> Result<u64> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut skipped = 0u64;
        while skipped < n {
            let want = (n - skipped).min(BLOCK_SIZE as u64) as usize;
            let got = self.read(&mut block[..want])?;
            if got == 0 {
                break;
            }
            skipped += got as u64;
        }
        Ok(skipped)
    }

    /// Drain the rest of the entry into memory.
    pub fn read_to_bytes(&mut self) -> Result<Bytes> {
        let remaining = self.size.saturating_sub(self.position);
        let result = self.handle_mut()?.read_data_to_bytes(remaining);
        match result {
            Ok(bytes) => {
                self.position += bytes.len() as u64;
                Ok(bytes)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Release the decoder and the source. Idempotent.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
            tracing::trace!("Closed replay stream for '{}'", self.target.pathname);
        }
    }

    /// Move the open decoder out, leaving `self` closed.
    fn detach(&mut self) -> ReplayStream {
        ReplayStream {
            handle: self.handle.take(),
            target: self.target.clone(),
            size: self.size,
            position: self.position,
        }
    }

    /// Run `op` against this stream on the executor's blocking pool.
    ///
    /// The stream travels to the worker and back. If the task is cancelled
    /// before it starts, the stream is dropped on the way and stays closed.
    async fn run_detached<T, F>(
        &mut self,
        executor: &Executor,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut ReplayStream) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut inner = self.detach();
        if inner.is_closed() {
            return op(&mut inner);
        }
        let (inner, result) = executor
            .run(cancel, move |token| {
                inner.set_cancellable(&token);
                let result = op(&mut inner);
                Ok((inner, result))
            })
            .await?;
        *self = inner;
        result
    }

    /// Read up to `len` bytes on the executor.
    pub async fn read_async(
        &mut self,
        executor: &Executor,
        len: usize,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.run_detached(executor, cancel, move |stream| {
            let mut buf = vec![0u8; len];
            let n = stream.read(&mut buf)?;
            buf.truncate(n);
            Ok(Bytes::from(buf))
        })
        .await
    }

    pub async fn skip_async(
        &mut self,
        executor: &Executor,
        n: u64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        self.run_detached(executor, cancel, move |stream| stream.skip(n))
            .await
    }
}

impl Read for ReplayStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        ReplayStream::read(self, buf).map_err(io::Error::from)
    }
}

impl std::fmt::Debug for ReplayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayStream")
            .field("target", &self.target.pathname)
            .field("size", &self.size)
            .field("position", &self.position)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Sequential reader over one entry's content, either served from a
/// memoized buffer or from a live replay.
#[derive(Debug)]
pub enum ContentStream {
    Memory(Cursor<Bytes>),
    Replay(ReplayStream),
}

impl ContentStream {
    pub fn from_bytes(bytes: Bytes) -> Self {
        ContentStream::Memory(Cursor::new(bytes))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, ContentStream::Memory(_))
    }

    pub fn skip(&mut self, n: u64) -> Result<u64> {
        match self {
            ContentStream::Memory(cursor) => {
                let len = cursor.get_ref().len() as u64;
                let pos = cursor.position().min(len);
                let skipped = n.min(len - pos);
                cursor.set_position(pos + skipped);
                Ok(skipped)
            }
            ContentStream::Replay(stream) => stream.skip(n),
        }
    }

    /// Everything not yet read.
    pub fn read_to_bytes(&mut self) -> Result<Bytes> {
        match self {
            ContentStream::Memory(cursor) => {
                let len = cursor.get_ref().len();
                let pos = usize::try_from(cursor.position()).unwrap_or(len).min(len);
                cursor.set_position(len as u64);
                Ok(cursor.get_ref().slice(pos..))
            }
            ContentStream::Replay(stream) => stream.read_to_bytes(),
        }
    }

    /// Read up to `len` bytes; an empty result marks the end.
    pub async fn read_async(
        &mut self,
        executor: &Executor,
        len: usize,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        match self {
            ContentStream::Memory(cursor) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let mut buf = vec![0u8; len];
                let n = Read::read(cursor, &mut buf)?;
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            ContentStream::Replay(stream) => stream.read_async(executor, len, cancel).await,
        }
    }

    pub async fn skip_async(
        &mut self,
        executor: &Executor,
        n: u64,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        match self {
            ContentStream::Memory(_) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                self.skip(n)
            }
            ContentStream::Replay(stream) => stream.skip_async(executor, n, cancel).await,
        }
    }

    pub fn close(&mut self) {
        if let ContentStream::Replay(stream) = self {
            stream.close();
        }
    }

    /// Chunks of at most `chunk_size` bytes, read on the executor, until the
    /// end of the entry. The stream ends after the first error.
    pub fn into_chunks(
        self,
        executor: Executor,
        chunk_size: usize,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Bytes>> + Send {
        stream::unfold(Some(self), move |state| {
            let executor = executor.clone();
            let cancel = cancel.clone();
            async move {
                let mut content = state?;
                match content.read_async(&executor, chunk_size, &cancel).await {
                    Ok(chunk) if chunk.is_empty() => None,
                    Ok(chunk) => Some((Ok(chunk), Some(content))),
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
    }
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ContentStream::Memory(cursor) => cursor.read(buf),
            ContentStream::Replay(stream) => Read::read(stream, buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ByteSource;

    fn fixture() -> Vec<u8> {
        build(&[("a.txt", &b"hello"[..]), ("dir/b.txt", &b"bye"[..])])
    }

    fn build(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for &(path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_replay_reaches_target() {
        let source = SourceHandle::seekable(Cursor::new(fixture()));
        let cancel = CancellationToken::new();
        let mut stream = ReplayStream::open(&source, 0, EntryIdentity::new("dir/b.txt"), &cancel).unwrap();
        assert!(source.is_in_use());
        assert_eq!(stream.size(), 3);
        assert_eq!(&stream.read_to_bytes().unwrap()[..], b"bye");
        stream.close();
        assert!(!source.is_in_use());
    }

    #[test]
    fn test_replay_missing_entry_releases_source() {
        let source = SourceHandle::seekable(Cursor::new(fixture()));
        let err = ReplayStream::open(&source, 0, EntryIdentity::new("nope"), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
        assert!(!source.is_in_use());
    }

    #[test]
    fn test_replay_needs_seekable_source() {
        let source = SourceHandle::sequential(Cursor::new(fixture()));
        let err = ReplayStream::open(&source, 0, EntryIdentity::new("a.txt"), &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::UnseekableInput));
    }

    #[test]
    fn test_skip_then_read() {
        let source = SourceHandle::seekable(Cursor::new(fixture()));
        let mut stream =
            ReplayStream::open(&source, 0, EntryIdentity::new("a.txt"), &CancellationToken::new()).unwrap();
        assert_eq!(stream.skip(2).unwrap(), 2);
        let mut rest = String::new();
        Read::read_to_string(&mut stream, &mut rest).unwrap();
        assert_eq!(rest, "llo");
        assert_eq!(stream.skip(10).unwrap(), 0);
    }

    #[test]
    fn test_cancel_mid_stream_closes() {
        let big = vec![b'x'; 8 * BLOCK_SIZE];
        let source = SourceHandle::seekable(Cursor::new(build(&[("big.bin", &big)])));
        let cancel = CancellationToken::new();
        let mut stream = ReplayStream::open(&source, 0, EntryIdentity::new("big.bin"), &cancel).unwrap();
        cancel.cancel();
        let err = loop {
            match stream.read(&mut [0u8; BLOCK_SIZE]) {
                Ok(0) => panic!("cancelled stream reached the end"),
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert!(err.is_cancelled(), "{err:?}");
        assert!(stream.is_closed());
        assert!(!source.is_in_use());
    }

    #[test]
    fn test_cancel_surfaces_through_io_read() {
        let big = vec![b'x'; 64 * BLOCK_SIZE];
        let source = SourceHandle::seekable(Cursor::new(build(&[("big.bin", &big)])));
        let cancel = CancellationToken::new();
        let mut stream = ContentStream::Replay(
            ReplayStream::open(&source, 0, EntryIdentity::new("big.bin"), &cancel).unwrap(),
        );
        let mut head = [0u8; 10];
        stream.read_exact(&mut head).unwrap();
        cancel.cancel();

        let mut rest = Vec::new();
        let err = stream.read_to_end(&mut rest).unwrap_err();
        assert!(Error::from(err).is_cancelled());
        assert!(!source.is_in_use());
    }

    /// Seekable source that cancels `token` once its position passes `after`.
    struct CancelAfter {
        inner: Cursor<Vec<u8>>,
        after: u64,
        token: CancellationToken,
    }

    impl CancelAfter {
        fn trip(&self) {
            if self.inner.position() > self.after {
                self.token.cancel();
            }
        }
    }

    impl ByteSource for CancelAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.trip();
            Ok(n)
        }

        fn skip(&mut self, n: u64) -> io::Result<u64> {
            let here = self.inner.position();
            let end = self.inner.get_ref().len() as u64;
            let target = here.saturating_add(n).min(end);
            self.inner.set_position(target);
            self.trip();
            Ok(target - here)
        }

        fn can_seek(&self) -> bool {
            true
        }

        fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
            io::Seek::seek(&mut self.inner, pos)
        }
    }

    /// Eight poorly compressible 16 KiB entries followed by `last.bin`.
    fn long_archive() -> Vec<u8> {
        let mut state = 0x2545_f491u32;
        let mut noise = || -> Vec<u8> {
            (0..16 * 1024)
                .map(|_| {
                    state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                    (state >> 24) as u8
                })
                .collect()
        };
        let fillers: Vec<(String, Vec<u8>)> = (0..8).map(|i| (format!("fill{i}.bin"), noise())).collect();
        let mut entries: Vec<(&str, &[u8])> = fillers
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice()))
            .collect();
        entries.push(("last.bin", &b"end"[..]));
        build(&entries)
    }

    fn cancel_while_positioning(archive: Vec<u8>) {
        let token = CancellationToken::new();
        let source = SourceHandle::new(Box::new(CancelAfter {
            inner: Cursor::new(archive),
            after: 32 * 1024,
            token: token.clone(),
        }));
        let err = ReplayStream::open(&source, 0, EntryIdentity::new("last.bin"), &token).unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
        assert!(!source.is_in_use());
    }

    #[test]
    fn test_cancel_while_positioning_releases_source() {
        cancel_while_positioning(long_archive());
    }

    #[test]
    fn test_cancel_while_positioning_gzip() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&long_archive()).unwrap();
        cancel_while_positioning(encoder.finish().unwrap());
    }

    #[test]
    fn test_cancel_while_positioning_bzip2() {
        use bzip2::Compression;
        use bzip2::write::BzEncoder;
        use std::io::Write;

        let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(&long_archive()).unwrap();
        cancel_while_positioning(encoder.finish().unwrap());
    }

    #[test]
    fn test_memory_stream_skip_and_drain() {
        let mut stream = ContentStream::from_bytes(Bytes::from_static(b"hello"));
        assert_eq!(stream.skip(1).unwrap(), 1);
        assert_eq!(&stream.read_to_bytes().unwrap()[..], b"ello");
        assert_eq!(stream.skip(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_async_reads_return_stream() {
        let executor = Executor::current();
        let cancel = CancellationToken::new();
        let source = SourceHandle::seekable(Cursor::new(fixture()));
        let target = EntryIdentity::new("a.txt");
        let mut stream = ReplayStream::open_async(&executor, source.clone(), 0, target, &cancel)
            .await
            .unwrap();
        let head = stream.read_async(&executor, 2, &cancel).await.unwrap();
        assert_eq!(&head[..], b"he");
        assert_eq!(stream.skip_async(&executor, 1, &cancel).await.unwrap(), 1);
        let tail = stream.read_async(&executor, 16, &cancel).await.unwrap();
        assert_eq!(&tail[..], b"lo");
        drop(stream);
        assert!(!source.is_in_use());
    }

    #[tokio::test]
    async fn test_chunked_stream_covers_entry() {
        use futures::StreamExt;

        let executor = Executor::current();
        let source = SourceHandle::seekable(Cursor::new(fixture()));
        let stream =
            ReplayStream::open(&source, 0, EntryIdentity::new("a.txt"), &CancellationToken::new()).unwrap();
        let chunks: Vec<Bytes> = ContentStream::Replay(stream)
            .into_chunks(executor, 2, CancellationToken::new())
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), b"hello");
        assert!(!source.is_in_use());
    }

    #[tokio::test]
    async fn test_async_read_cancelled_before_submit_closes() {
        let executor = Executor::current();
        let source = SourceHandle::seekable(Cursor::new(fixture()));
        let mut stream =
            ReplayStream::open(&source, 0, EntryIdentity::new("a.txt"), &CancellationToken::new()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = stream.read_async(&executor, 8, &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(stream.is_closed());
        assert!(!source.is_in_use());
    }
}
