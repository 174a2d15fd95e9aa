use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;

use super::output::{hex_dump, write_raw};
use super::{Command, ShellState};
use crate::shell::is_directory;
use crate::vfs::QueryFlags;

/// Bytes pulled from the archive per read.
const CHUNK_SIZE: usize = 64 * 1024;
/// How much of a binary file is shown as hex.
const HEX_PREVIEW: usize = 1024;

pub struct CatCommand;

#[async_trait]
impl Command for CatCommand {
    fn name(&self) -> &str {
        "cat"
    }

    fn usage(&self) -> &str {
        "cat FILE... - Display file contents"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        if args.is_empty() {
            return Err(anyhow!("Usage: cat FILE..."));
        }

        for path_str in args {
            let file = state.resolve(path_str)?;
            if is_directory(&file) {
                return Err(anyhow!("Is a directory: {path_str}"));
            }

            let content = file
                .read_async(state.executor(), state.cancel_token())
                .await
                .with_context(|| format!("cannot read '{path_str}'"))?;

            let mut chunks = content
                .into_chunks(state.executor().clone(), CHUNK_SIZE, state.cancel_token().clone())
                .boxed();

            let mut first = true;
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.with_context(|| format!("error reading '{path_str}'"))?;
                if first && looks_binary(&chunk) {
                    eprintln!("Warning: File contains binary data");
                    let shown = chunk.len().min(HEX_PREVIEW);
                    if !write_raw(hex_dump(&chunk[..shown]).as_bytes())? {
                        return Ok(());
                    }
                    let size = file.query_info("standard::size", QueryFlags::default())?.size();
                    if let Some(size) = size
                        && size > shown as u64
                    {
                        eprintln!("... ({} more bytes)", size - shown as u64);
                    }
                    break;
                }
                first = false;
                if !write_raw(&chunk)? {
                    // Reader went away (e.g. `| head`)
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

/// Content that is not UTF-8 text. A multi-byte character cut off at the end
/// of the chunk does not count.
fn looks_binary(chunk: &[u8]) -> bool {
    match std::str::from_utf8(chunk) {
        Ok(_) => false,
        Err(e) => e.error_len().is_some(),
    }
}
