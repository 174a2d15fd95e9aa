use bzip2::bufread::MultiBzDecoder;
use flate2::bufread::MultiGzDecoder;
use std::io::{self, BufRead, Read};

use super::SkipRead;
use super::adapter::AdapterReader;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BZIP2_MAGIC: [u8; 3] = *b"BZh";

/// Decompression stage between the adapter and the format decoder,
/// chosen by sniffing the first bytes of input.
pub enum FilterReader {
    Plain(AdapterReader),
    Gzip(MultiGzDecoder<AdapterReader>),
    Bzip2(MultiBzDecoder<AdapterReader>),
}

impl FilterReader {
    pub fn detect(mut reader: AdapterReader) -> io::Result<Self> {
        let head = reader.fill_buf()?;
        if head.starts_with(&GZIP_MAGIC) {
            Ok(FilterReader::Gzip(MultiGzDecoder::new(reader)))
        } else if head.starts_with(&BZIP2_MAGIC) {
            Ok(FilterReader::Bzip2(MultiBzDecoder::new(reader)))
        } else {
            Ok(FilterReader::Plain(reader))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterReader::Plain(_) => "none",
            FilterReader::Gzip(_) => "gzip",
            FilterReader::Bzip2(_) => "bzip2",
        }
    }
}

impl Read for FilterReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FilterReader::Plain(r) => r.read(buf),
            FilterReader::Gzip(r) => r.read(buf),
            FilterReader::Bzip2(r) => r.read(buf),
        }
    }
}

impl SkipRead for FilterReader {
    fn skip(&mut self, n: u64) -> io::Result<u64> {
        match self {
            // Uncompressed input can be skipped on the source itself.
            FilterReader::Plain(r) => r.skip(n),
            _ => io::copy(&mut Read::take(&mut *self, n), &mut io::sink()),
        }
    }
}
