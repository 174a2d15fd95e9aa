//! Output helpers for shell commands with BrokenPipe handling.
//!
//! Output piped into something like `head` may be closed early. That is not
//! an error for the command: it stops writing and returns `Ok(())`.

use std::io::{self, Write};

/// Print with newline, handling BrokenPipe gracefully.
///
/// Returns `Ok(())` from the enclosing function on BrokenPipe.
/// Propagates other IO errors.
macro_rules! print_line {
    ($($arg:tt)*) => {{
        use std::io::Write;
        match writeln!(std::io::stdout(), $($arg)*) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }};
}

pub(crate) use print_line;

/// Whether writing stopped because the reader went away.
pub fn is_broken_pipe(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::BrokenPipe
}

/// Write raw bytes to stdout. `Ok(false)` means the pipe was closed.
pub fn write_raw(bytes: &[u8]) -> io::Result<bool> {
    let mut out = io::stdout().lock();
    match out.write_all(bytes) {
        Ok(()) => Ok(true),
        Err(e) if is_broken_pipe(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Hex dump of `bytes`, 16 per row, prefixed with their offset.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:08x}: ", row * 16));
        for byte in chunk {
            out.push_str(&format!("{byte:02x} "));
        }
        out.push('\n');
    }
    out
}
