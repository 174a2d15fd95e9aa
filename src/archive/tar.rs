use std::io;

use super::filter::FilterReader;
use super::{DecodeError, Decoder, EntryMetadata, FileKind, SkipRead, Timestamp};

const TAR_BLOCK: usize = 512;

/// Upper bound for GNU long-name and pax records held in memory.
const MAX_EXTENSION_SIZE: u64 = 1024 * 1024;

/// Sequential tar decoder (v7, ustar, GNU long names, pax local headers).
pub struct TarDecoder<R> {
    input: R,
    filter: &'static str,
    format: &'static str,
    /// First header block, read while probing the format.
    pending: Option<[u8; TAR_BLOCK]>,
    /// Content bytes left in the current entry.
    remaining: u64,
    /// Padding after the current entry's content.
    padding: u64,
    finished: bool,
}

impl TarDecoder<FilterReader> {
    pub fn open(input: FilterReader) -> Result<Self, DecodeError> {
        let filter = input.name();
        Self::with_filter(input, filter)
    }
}

impl<R: SkipRead> TarDecoder<R> {
    /// Probe the first block: zero bytes of input is an empty archive,
    /// anything else must be a checksum-valid header or an end marker.
    pub fn with_filter(mut input: R, filter: &'static str) -> Result<Self, DecodeError> {
        let mut block = [0u8; TAR_BLOCK];
        let got = read_block(&mut input, &mut block)?;
        let mut decoder = TarDecoder {
            input,
            filter,
            format: "tar",
            pending: None,
            remaining: 0,
            padding: 0,
            finished: false,
        };
        if !got {
            decoder.format = "empty";
            decoder.finished = true;
            return Ok(decoder);
        }
        if !is_zero_block(&block) && !checksum_ok(&block) {
            return Err(DecodeError::format("unrecognized archive format"));
        }
        decoder.pending = Some(block);
        Ok(decoder)
    }

    fn next_block(&mut self, block: &mut [u8; TAR_BLOCK]) -> Result<bool, DecodeError> {
        if let Some(pending) = self.pending.take() {
            *block = pending;
            return Ok(true);
        }
        read_block(&mut self.input, block)
    }

    fn skip_exact(&mut self, n: u64) -> Result<(), DecodeError> {
        if n == 0 {
            return Ok(());
        }
        let skipped = self.input.skip(n).map_err(|e| DecodeError::from_io(&e))?;
        if skipped < n {
            return Err(DecodeError::truncated());
        }
        Ok(())
    }

    /// Read an extension record's payload (and its padding) into memory.
    fn read_extension(&mut self, size: u64) -> Result<Vec<u8>, DecodeError> {
        if size > MAX_EXTENSION_SIZE {
            return Err(DecodeError::format(format!(
                "extension header too large ({size} bytes)"
            )));
        }
        let mut data = vec![0u8; size as usize];
        read_full(&mut self.input, &mut data)?;
        self.skip_exact(round_up_512(size) - size)?;
        Ok(data)
    }
}

impl<R: SkipRead> Decoder for TarDecoder<R> {
    fn next_header(&mut self) -> Result<Option<EntryMetadata>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        let leftover = self.remaining + self.padding;
        self.remaining = 0;
        self.padding = 0;
        self.skip_exact(leftover)?;

        let mut long_name: Option<String> = None;
        let mut long_link: Option<String> = None;
        let mut pax: Vec<(String, String)> = Vec::new();
        let mut zero_blocks = 0u8;
        let mut block = [0u8; TAR_BLOCK];

        loop {
            if !self.next_block(&mut block)? {
                // Tolerate archives that stop on a header boundary without
                // the end-of-archive marker.
                self.finished = true;
                return Ok(None);
            }

            if is_zero_block(&block) {
                zero_blocks += 1;
                if zero_blocks >= 2 {
                    self.finished = true;
                    return Ok(None);
                }
                continue;
            }
            zero_blocks = 0;

            if !checksum_ok(&block) {
                return Err(DecodeError::format("damaged tar archive: bad header checksum"));
            }

            let header = tar::Header::from_byte_slice(&block);
            let entry_type = header.entry_type();
            let size = header
                .entry_size()
                .map_err(|e| DecodeError::format(format!("bad size field: {e}")))?;

            if entry_type.is_gnu_longname() {
                long_name = Some(trim_nul(&self.read_extension(size)?));
                continue;
            }
            if entry_type.is_gnu_longlink() {
                long_link = Some(trim_nul(&self.read_extension(size)?));
                continue;
            }
            if entry_type.is_pax_local_extensions() {
                let data = self.read_extension(size)?;
                pax = parse_pax(&data)?;
                continue;
            }
            if entry_type.is_pax_global_extensions() {
                self.skip_exact(round_up_512(size))?;
                continue;
            }

            let mut meta = header_metadata(header)?;
            if let Some(name) = long_name.take() {
                meta.pathname = name;
            }
            if let Some(link) = long_link.take() {
                match meta.kind {
                    FileKind::HardLink => meta.hardlink_target = Some(link),
                    _ => meta.symlink_target = Some(link),
                }
            }
            let mut stored = size;
            for (key, value) in &pax {
                apply_pax(&mut meta, &mut stored, key, value)?;
            }
            if meta.kind == FileKind::Regular && meta.pathname.ends_with('/') {
                // Old v7 archives mark directories only by the trailing slash.
                meta.kind = FileKind::Directory;
            }
            meta.size = if meta.kind.is_regular() { stored } else { 0 };

            self.remaining = stored;
            self.padding = round_up_512(stored) - stored;
            return Ok(Some(meta));
        }
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = (self.remaining.min(buf.len() as u64)) as usize;
        let n = loop {
            match self.input.read(&mut buf[..want]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DecodeError::from_io(&e)),
            }
        };
        if n == 0 {
            return Err(DecodeError::truncated());
        }
        self.remaining -= n as u64;
        Ok(n)
    }

    fn format_name(&self) -> &'static str {
        self.format
    }

    fn filter_name(&self) -> &'static str {
        self.filter
    }
}

fn header_metadata(header: &tar::Header) -> Result<EntryMetadata, DecodeError> {
    let bad = |field: &str, e: io::Error| DecodeError::format(format!("bad {field} field: {e}"));

    let entry_type = header.entry_type();
    let kind = if entry_type.is_file() || entry_type.is_contiguous() {
        FileKind::Regular
    } else if entry_type.is_dir() {
        FileKind::Directory
    } else if entry_type.is_symlink() {
        FileKind::Symlink
    } else if entry_type.is_hard_link() {
        FileKind::HardLink
    } else if entry_type.is_character_special() {
        FileKind::CharDevice
    } else if entry_type.is_block_special() {
        FileKind::BlockDevice
    } else if entry_type.is_fifo() {
        FileKind::Fifo
    } else {
        FileKind::Unknown
    };

    let pathname = String::from_utf8_lossy(&header.path_bytes()).into_owned();
    let mut meta = EntryMetadata::new(pathname, kind, 0);
    let raw = header.as_old();
    meta.mode = numeric_field(&raw.mode, header.mode().map(u64::from))
        .map_err(|e| bad("mode", e))? as u32
        & 0o7777;
    meta.uid = numeric_field(&raw.uid, header.uid()).map_err(|e| bad("uid", e))?;
    meta.gid = numeric_field(&raw.gid, header.gid()).map_err(|e| bad("gid", e))?;
    meta.user = header.username().ok().flatten().map(str::to_string);
    meta.group = header.groupname().ok().flatten().map(str::to_string);
    meta.modified = Some(Timestamp::from_secs(
        numeric_field(&raw.mtime, header.mtime()).map_err(|e| bad("mtime", e))? as i64,
    ));
    if let Some(gnu) = header.as_gnu() {
        meta.accessed = gnu.atime().ok().filter(|t| *t != 0).map(|t| Timestamp::from_secs(t as i64));
        meta.changed = gnu.ctime().ok().filter(|t| *t != 0).map(|t| Timestamp::from_secs(t as i64));
    }
    if let Some(link) = header.link_name_bytes() {
        let link = String::from_utf8_lossy(&link).into_owned();
        match kind {
            FileKind::Symlink => meta.symlink_target = Some(link),
            FileKind::HardLink => meta.hardlink_target = Some(link),
            _ => {}
        }
    }
    Ok(meta)
}

fn apply_pax(
    meta: &mut EntryMetadata,
    stored: &mut u64,
    key: &str,
    value: &str,
) -> Result<(), DecodeError> {
    let number = |v: &str| {
        v.parse::<u64>()
            .map_err(|_| DecodeError::format(format!("bad pax {key} value '{v}'")))
    };
    match key {
        "path" => meta.pathname = value.to_string(),
        "linkpath" => match meta.kind {
            FileKind::HardLink => meta.hardlink_target = Some(value.to_string()),
            _ => meta.symlink_target = Some(value.to_string()),
        },
        "size" => *stored = number(value)?,
        "uid" => meta.uid = number(value)?,
        "gid" => meta.gid = number(value)?,
        "uname" => meta.user = Some(value.to_string()),
        "gname" => meta.group = Some(value.to_string()),
        "mtime" => meta.modified = Timestamp::parse_decimal(value).or(meta.modified),
        "atime" => meta.accessed = Timestamp::parse_decimal(value).or(meta.accessed),
        "ctime" => meta.changed = Timestamp::parse_decimal(value).or(meta.changed),
        "LIBARCHIVE.creationtime" => meta.created = Timestamp::parse_decimal(value),
        _ => {}
    }
    Ok(())
}

/// Parse pax extended header records: `"<len> <key>=<value>\n"`.
fn parse_pax(data: &[u8]) -> Result<Vec<(String, String)>, DecodeError> {
    let mut records = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.iter().all(|&b| b == 0) {
            break;
        }
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| DecodeError::format("malformed pax record"))?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DecodeError::format("malformed pax record length"))?;
        if len <= space + 1 || len > rest.len() {
            return Err(DecodeError::format("pax record length out of range"));
        }
        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        let eq = record
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| DecodeError::format("pax record without '='"))?;
        records.push((
            String::from_utf8_lossy(&record[..eq]).into_owned(),
            String::from_utf8_lossy(&record[eq + 1..]).into_owned(),
        ));
        rest = &rest[len..];
    }
    Ok(records)
}

/// Read one 512-byte block. `Ok(false)` on clean EOF before any byte.
fn read_block<R: SkipRead>(input: &mut R, block: &mut [u8; TAR_BLOCK]) -> Result<bool, DecodeError> {
    let mut total = 0;
    while total < TAR_BLOCK {
        match input.read(&mut block[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DecodeError::from_io(&e)),
        }
    }
    match total {
        0 => Ok(false),
        TAR_BLOCK => Ok(true),
        _ => Err(DecodeError::truncated()),
    }
}

fn read_full<R: SkipRead>(input: &mut R, buf: &mut [u8]) -> Result<(), DecodeError> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            DecodeError::truncated()
        } else {
            DecodeError::from_io(&e)
        }
    })
}

fn is_zero_block(block: &[u8; TAR_BLOCK]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Header checksum: sum of all bytes with the checksum field read as spaces.
fn checksum_ok(block: &[u8; TAR_BLOCK]) -> bool {
    let stored = match parse_octal_u64(&block[148..156]) {
        Some(v) => v,
        None => return false,
    };
    let sum: u64 = block
        .iter()
        .enumerate()
        .map(|(i, &b)| if (148..156).contains(&i) { b' ' as u64 } else { b as u64 })
        .sum();
    sum == stored
}

/// Parse an octal number from a tar header field
fn parse_octal_u64(field: &[u8]) -> Option<u64> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let s = String::from_utf8_lossy(&field[..end]).trim().to_string();
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(&s, 8).ok()
}

/// A numeric header field, with a blank (all NUL or space) field read as 0.
fn numeric_field(raw: &[u8], parsed: io::Result<u64>) -> io::Result<u64> {
    match parsed {
        Err(_) if raw.iter().all(|&b| b == 0 || b == b' ') => Ok(0),
        other => other,
    }
}

/// Strip the NUL terminator GNU long-name records carry.
fn trim_nul(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Round up to next 512-byte boundary
fn round_up_512(n: u64) -> u64 {
    n.div_ceil(TAR_BLOCK as u64) * TAR_BLOCK as u64
}
