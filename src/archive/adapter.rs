//! Bridges the byte source to the sequential decoder.
//!
//! The decoder only ever sees an [`AdapterReader`]: reads are served from a
//! fixed-size scratch block, skips and seeks are forwarded to the source.
//! When the source fails, the real error is parked in the handle's deferred
//! error slot and the decoder gets an opaque fatal error; the parked error
//! wins when the decoder's failure is translated back.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use super::filter::FilterReader;
use super::tar::TarDecoder;
use super::{DecodeError, Decoder, EntryIdentity, EntryMetadata};
use crate::error::{Error, Result};
use crate::source::{SourceHandle, SourceLease};

/// Size of one pull from the byte source.
pub const BLOCK_SIZE: usize = 1024;

/// Per-pass state shared between the handle and the reader the decoder owns.
struct Binding {
    lease: SourceLease,
    cancel: Mutex<CancellationToken>,
    error: Mutex<Option<Error>>,
}

impl Binding {
    fn source(&self) -> &SourceHandle {
        self.lease.source()
    }

    fn store_error(&self, e: Error) {
        let mut slot = self.error.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(e);
        }
    }

    fn take_error(&self) -> Option<Error> {
        self.error.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    fn set_cancel(&self, token: CancellationToken) {
        *self.cancel.lock().unwrap_or_else(|p| p.into_inner()) = token;
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_cancelled()
    }

    /// Cancellation checkpoint, taken before every source operation.
    fn checkpoint(&self) -> io::Result<()> {
        if self.is_cancelled() {
            self.store_error(Error::Cancelled);
            return Err(fatal());
        }
        Ok(())
    }

    fn fail(&self, e: io::Error) -> io::Error {
        self.store_error(Error::from(e));
        fatal()
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        if let Some(e) = self.take_error() {
            tracing::warn!("Pending error at archive handle release: {}", e);
        }
    }
}

fn fatal() -> io::Error {
    io::Error::other("byte source failed")
}

/// The reader handed to the decoder.
pub struct AdapterReader {
    binding: Arc<Binding>,
    block: Box<[u8]>,
    pos: usize,
    filled: usize,
}

impl AdapterReader {
    fn new(binding: Arc<Binding>) -> Self {
        AdapterReader {
            binding,
            block: vec![0u8; BLOCK_SIZE].into_boxed_slice(),
            pos: 0,
            filled: 0,
        }
    }

    fn buffered(&self) -> usize {
        self.filled - self.pos
    }

    /// Pull up to one block from the source, retrying short reads.
    fn fill_block(&mut self) -> io::Result<()> {
        self.binding.checkpoint()?;
        let mut source = self.binding.source().lock();
        let mut total = 0;
        while total < self.block.len() {
            match source.read(&mut self.block[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.pos = 0;
                    self.filled = 0;
                    return Err(self.binding.fail(e));
                }
            }
        }
        self.pos = 0;
        self.filled = total;
        Ok(())
    }

    /// Discard up to `n` bytes, using the source's own skip past the buffer.
    pub fn skip(&mut self, n: u64) -> io::Result<u64> {
        let from_buffer = (self.buffered() as u64).min(n);
        self.pos += from_buffer as usize;
        let rest = n - from_buffer;
        if rest == 0 {
            return Ok(from_buffer);
        }
        self.binding.checkpoint()?;
        let skipped = self
            .binding
            .source()
            .lock()
            .skip(rest)
            .map_err(|e| self.binding.fail(e))?;
        Ok(from_buffer + skipped)
    }
}

impl Read for AdapterReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for AdapterReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.filled {
            self.fill_block()?;
        }
        Ok(&self.block[self.pos..self.filled])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.filled);
    }
}

impl Seek for AdapterReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.binding.checkpoint()?;
        if !self.binding.source().can_seek() {
            self.binding.store_error(Error::UnseekableInput);
            return Err(fatal());
        }
        // The source is ahead of the logical position by whatever is buffered.
        let pos = match pos {
            SeekFrom::Current(off) => SeekFrom::Current(off - self.buffered() as i64),
            other => other,
        };
        let new_pos = self
            .binding
            .source()
            .lock()
            .seek(pos)
            .map_err(|e| self.binding.fail(e))?;
        self.pos = 0;
        self.filled = 0;
        Ok(new_pos)
    }
}

/// One decode pass over a byte source.
///
/// Holds the source's in-use mark for its whole lifetime; dropping the handle
/// (or calling [`close`](ArchiveHandle::close)) releases it. Moving the handle
/// into another owner, e.g. a replay stream, transfers the whole binding at
/// once.
pub struct ArchiveHandle {
    decoder: Box<dyn Decoder>,
    binding: Arc<Binding>,
}

impl ArchiveHandle {
    /// Start a pass at the source's current position.
    ///
    /// # Panics
    ///
    /// Panics if the source is already driving another pass.
    pub fn open(source: &SourceHandle, cancel: &CancellationToken) -> Result<Self> {
        Self::open_inner(source, None, cancel)
    }

    /// Rewind the source to `offset`, then start a pass there.
    ///
    /// # Panics
    ///
    /// Panics if the source is already driving another pass.
    pub fn open_at(source: &SourceHandle, offset: u64, cancel: &CancellationToken) -> Result<Self> {
        Self::open_inner(source, Some(offset), cancel)
    }

    fn open_inner(
        source: &SourceHandle,
        rewind: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let binding = Arc::new(Binding {
            lease: SourceLease::acquire(source),
            cancel: Mutex::new(cancel.clone()),
            error: Mutex::new(None),
        });
        let mut reader = AdapterReader::new(Arc::clone(&binding));

        if let Some(offset) = rewind {
            if let Err(e) = reader.seek(SeekFrom::Start(offset)) {
                return Err(binding.take_error().unwrap_or_else(|| e.into()));
            }
        }

        let decoder = FilterReader::detect(reader)
            .map_err(|e| DecodeError::from_io(&e))
            .and_then(TarDecoder::open)
            .map_err(|e| translate(&binding, e))?;

        tracing::debug!(
            "Opened archive pass (format: {}, filter: {})",
            decoder.format_name(),
            decoder.filter_name()
        );

        Ok(ArchiveHandle {
            decoder: Box::new(decoder),
            binding,
        })
    }

    /// Replace the cancellation token consulted at the next checkpoints.
    pub fn set_cancellable(&self, cancel: &CancellationToken) {
        self.binding.set_cancel(cancel.clone());
    }

    pub fn source(&self) -> &SourceHandle {
        self.binding.source()
    }

    pub fn format_name(&self) -> &'static str {
        self.decoder.format_name()
    }

    pub fn filter_name(&self) -> &'static str {
        self.decoder.filter_name()
    }

    pub fn next_header(&mut self) -> Result<Option<EntryMetadata>> {
        self.decoder
            .next_header()
            .map_err(|e| translate(&self.binding, e))
    }

    pub fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.decoder
            .read_data(buf)
            .map_err(|e| translate(&self.binding, e))
    }

    /// Drain the current entry into `sink`, returning the byte count.
    pub fn copy_data_to(&mut self, sink: &mut dyn Write) -> Result<u64> {
        let mut block = [0u8; BLOCK_SIZE];
        let mut total = 0u64;
        loop {
            let n = self.read_data(&mut block)?;
            if n == 0 {
                return Ok(total);
            }
            sink.write_all(&block[..n])
                .map_err(|e| Error::Failed(format!("failed to write entry data: {e}")))?;
            total += n as u64;
        }
    }

    /// Drain the current entry into memory.
    pub fn read_data_to_bytes(&mut self, size_hint: u64) -> Result<Bytes> {
        let capacity = usize::try_from(size_hint).unwrap_or(0).min(64 * 1024 * 1024);
        let mut out = BytesMut::with_capacity(capacity).writer();
        self.copy_data_to(&mut out)?;
        Ok(out.into_inner().freeze())
    }

    /// Advance past every entry until `target` is the current one.
    pub fn skip_to_entry(&mut self, target: &EntryIdentity) -> Result<EntryMetadata> {
        let mut skipped = 0usize;
        loop {
            match self.next_header()? {
                Some(meta) if target.matches(&meta.pathname) => {
                    tracing::debug!(
                        "Replay positioned on '{}' after skipping {} entries",
                        target.pathname,
                        skipped
                    );
                    return Ok(meta);
                }
                Some(_) => skipped += 1,
                None => return Err(Error::FileNotFound(target.pathname.clone())),
            }
        }
    }

    /// Release the decoder and the source's in-use mark.
    pub fn close(self) {}
}

fn translate(binding: &Binding, e: DecodeError) -> Error {
    binding.take_error().unwrap_or(Error::Archive {
        native: e.code,
        message: e.message,
    })
}
