use chrono::{DateTime, Utc};

/// Kind of an archive entry, derived from its type flag / mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    HardLink,
    CharDevice,
    BlockDevice,
    Fifo,
    Unknown,
}

impl FileKind {
    pub fn is_regular(self) -> bool {
        self == FileKind::Regular
    }

    pub fn is_dir(self) -> bool {
        self == FileKind::Directory
    }

    pub fn is_special(self) -> bool {
        matches!(
            self,
            FileKind::CharDevice | FileKind::BlockDevice | FileKind::Fifo
        )
    }
}

/// Seconds + nanoseconds since the Unix epoch, as stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nsecs: u32,
}

impl Timestamp {
    pub fn from_secs(secs: i64) -> Self {
        Timestamp { secs, nsecs: 0 }
    }

    /// Parse a pax-style decimal time, e.g. `1700000000.25`.
    pub fn parse_decimal(value: &str) -> Option<Self> {
        let (whole, frac) = match value.split_once('.') {
            Some((w, f)) => (w, f),
            None => (value, ""),
        };
        let mut secs = whole.parse::<i64>().ok()?;
        let mut nsecs = 0u32;
        if !frac.is_empty() {
            let digits: String = frac.chars().take(9).collect();
            let scale = 10u32.pow(9 - digits.len() as u32);
            nsecs = digits.parse::<u32>().ok()? * scale;
        }
        // `-1.5` is 1.5 s before the epoch: -2 s plus 0.5 s
        if whole.starts_with('-') && nsecs > 0 {
            secs = secs.checked_sub(1)?;
            nsecs = 1_000_000_000 - nsecs;
        }
        Some(Timestamp { secs, nsecs })
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.secs, self.nsecs)
    }
}

/// Owned snapshot of the metadata the decoder reports for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Path exactly as reported by the archive (used for replay matching).
    pub pathname: String,
    pub size: u64,
    pub kind: FileKind,
    /// Permission bits only; the type lives in `kind`.
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub user: Option<String>,
    pub group: Option<String>,
    pub modified: Option<Timestamp>,
    pub accessed: Option<Timestamp>,
    pub changed: Option<Timestamp>,
    pub created: Option<Timestamp>,
    pub symlink_target: Option<String>,
    pub hardlink_target: Option<String>,
}

impl EntryMetadata {
    pub fn new(pathname: impl Into<String>, kind: FileKind, size: u64) -> Self {
        EntryMetadata {
            pathname: pathname.into(),
            size,
            kind,
            mode: 0,
            uid: 0,
            gid: 0,
            user: None,
            group: None,
            modified: None,
            accessed: None,
            changed: None,
            created: None,
            symlink_target: None,
            hardlink_target: None,
        }
    }

    /// Final path component, ignoring trailing slashes.
    pub fn basename(&self) -> &str {
        let trimmed = self.pathname.trim_end_matches('/');
        match trimmed.rsplit('/').next() {
            Some(name) if !name.is_empty() => name,
            _ => trimmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_time() {
        assert_eq!(
            Timestamp::parse_decimal("1700000000"),
            Some(Timestamp::from_secs(1_700_000_000))
        );
        assert_eq!(
            Timestamp::parse_decimal("12.5"),
            Some(Timestamp {
                secs: 12,
                nsecs: 500_000_000
            })
        );
        assert_eq!(Timestamp::parse_decimal("x"), None);
    }

    #[test]
    fn test_parse_negative_fractional_time() {
        assert_eq!(
            Timestamp::parse_decimal("-1.5"),
            Some(Timestamp {
                secs: -2,
                nsecs: 500_000_000
            })
        );
        assert_eq!(
            Timestamp::parse_decimal("-0.25"),
            Some(Timestamp {
                secs: -1,
                nsecs: 750_000_000
            })
        );
        assert_eq!(Timestamp::parse_decimal("-3"), Some(Timestamp::from_secs(-3)));
    }

    #[test]
    fn test_basename() {
        let m = EntryMetadata::new("./dir/sub/", FileKind::Directory, 0);
        assert_eq!(m.basename(), "sub");
        let m = EntryMetadata::new("a.txt", FileKind::Regular, 5);
        assert_eq!(m.basename(), "a.txt");
    }
}
