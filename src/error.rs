use std::fmt;
use std::io;

/// Offset added to the decoder's native error code so it survives inside
/// this crate's error domain.
pub const ARCHIVE_ERROR_BASE: i32 = 100;

/// Stable numeric error domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Failed = 0,
    UnseekableInput = 1,
    FileNotFound = 2,
    InvalidFile = 3,
    Cancelled = 4,
    Archive = ARCHIVE_ERROR_BASE,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Failed => "failed",
            ErrorCode::UnseekableInput => "unseekable-input",
            ErrorCode::FileNotFound => "file-not-found",
            ErrorCode::InvalidFile => "invalid-file",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Archive => "archive",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Failed(String),

    #[error("seekable input needed")]
    UnseekableInput,

    #[error("file '{0}' not found in archive")]
    FileNotFound(String),

    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("operation was cancelled")]
    Cancelled,

    /// Error reported by the decoder; `native` is its own code.
    #[error("archive: {native}: {message}")]
    Archive { native: i32, message: String },
}

impl Error {
    pub fn invalid_file(what: impl Into<String>) -> Self {
        Error::InvalidFile(what.into())
    }

    pub fn kind(&self) -> ErrorCode {
        match self {
            Error::Failed(_) => ErrorCode::Failed,
            Error::UnseekableInput => ErrorCode::UnseekableInput,
            Error::FileNotFound(_) => ErrorCode::FileNotFound,
            Error::InvalidFile(_) => ErrorCode::InvalidFile,
            Error::Cancelled => ErrorCode::Cancelled,
            Error::Archive { .. } => ErrorCode::Archive,
        }
    }

    /// Stable numeric code. Archive errors carry `ARCHIVE_ERROR_BASE + native`.
    pub fn code(&self) -> i32 {
        match self {
            Error::Archive { native, .. } => ARCHIVE_ERROR_BASE + native,
            other => other.kind() as i32,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        // Errors that crossed an `io::Read` boundary may wrap one of ours.
        if e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = e.into_inner() {
                if let Ok(ours) = inner.downcast::<Error>() {
                    return *ours;
                }
            }
            return Error::Failed("unrecoverable wrapped error".to_string());
        }
        Error::Failed(e.to_string())
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        let kind = match e {
            Error::FileNotFound(_) => io::ErrorKind::NotFound,
            Error::InvalidFile(_) => io::ErrorKind::InvalidInput,
            Error::UnseekableInput => io::ErrorKind::Unsupported,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
