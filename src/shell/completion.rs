use rustyline::Context;
use rustyline::completion::{Completer, Pair};
use std::sync::{Arc, RwLock};

use crate::vfs::VirtualFile;

/// Entry in completion results with metadata
#[derive(Clone, Debug)]
pub struct CompletionEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Completion state shared between the shell and the line editor
#[derive(Clone)]
pub struct CompletionCache {
    /// Available commands
    commands: Vec<String>,
    /// Directory the shell is in
    current: Arc<RwLock<VirtualFile>>,
}

impl CompletionCache {
    pub fn new(current: VirtualFile) -> Self {
        CompletionCache {
            commands: ["ls", "cd", "cat", "stat", "pwd", "help", "exit"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            current: Arc::new(RwLock::new(current)),
        }
    }

    /// Update the current directory
    pub fn set_current(&self, file: VirtualFile) {
        if let Ok(mut current) = self.current.write() {
            *current = file;
        }
    }

    pub fn current(&self) -> Option<VirtualFile> {
        self.current.read().ok().map(|c| c.clone())
    }

    /// Get available commands
    pub fn get_commands(&self) -> Vec<String> {
        self.commands.clone()
    }

    /// Children of `rel_dir`, resolved against the current directory.
    /// The tree is in memory, so there is nothing to fetch or memoize.
    pub fn entries_for(&self, rel_dir: &str) -> Vec<CompletionEntry> {
        let Some(current) = self.current() else {
            return Vec::new();
        };
        let dir = if rel_dir.is_empty() {
            current
        } else {
            match current.resolve(rel_dir) {
                Ok(dir) => dir,
                Err(_) => return Vec::new(),
            }
        };
        dir.child_names()
            .into_iter()
            .map(|name| {
                let is_dir = dir
                    .child(&name)
                    .map(|c| super::is_directory(&c))
                    .unwrap_or(false);
                CompletionEntry { name, is_dir }
            })
            .collect()
    }
}

/// Tab completion helper for the shell
pub struct ShellCompleter {
    cache: CompletionCache,
}

impl ShellCompleter {
    pub fn new(cache: CompletionCache) -> Self {
        ShellCompleter { cache }
    }

    /// Complete a command at the start of the line
    fn complete_command(&self, line: &str) -> Vec<Pair> {
        self.cache
            .get_commands()
            .into_iter()
            .filter(|cmd| cmd.starts_with(line))
            .map(|cmd| Pair {
                display: cmd.clone(),
                replacement: cmd,
            })
            .collect()
    }

    /// Complete a path (file or directory)
    fn complete_path(&self, path: &str, command: &str) -> Vec<Pair> {
        // Split into the directory part (with its trailing slash) and the prefix
        let (dir_path, file_prefix) = match path.rfind('/') {
            Some(last_slash) => (&path[..last_slash + 1], &path[last_slash + 1..]),
            None => ("", path),
        };

        self.cache
            .entries_for(dir_path)
            .into_iter()
            .filter(|entry| {
                if !entry.name.starts_with(file_prefix) {
                    return false;
                }
                // cd only shows directories
                !(command == "cd" && !entry.is_dir)
            })
            .map(|entry| {
                let suffix = if entry.is_dir { "/" } else { "" };
                Pair {
                    display: format!("{}{}", entry.name, suffix),
                    replacement: format!("{}{}{}", dir_path, entry.name, suffix),
                }
            })
            .collect()
    }
}

impl Completer for ShellCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];

        // If line is empty or only whitespace, don't complete
        if line.trim().is_empty() {
            return Ok((0, Vec::new()));
        }

        let words: Vec<&str> = line.split_whitespace().collect();

        // On the first word, complete commands
        if words.len() == 1 && !line.ends_with(char::is_whitespace) {
            let completions = self.complete_command(words[0]);
            let start = line.len() - words[0].len();
            return Ok((start, completions));
        }

        let command = words[0];
        let current_word = if line.ends_with(char::is_whitespace) {
            ""
        } else {
            words.last().copied().unwrap_or("")
        };

        let completions = self.complete_path(current_word, command);
        Ok((pos - current_word.len(), completions))
    }
}

impl rustyline::Helper for ShellCompleter {}
impl rustyline::highlight::Highlighter for ShellCompleter {}
impl rustyline::hint::Hinter for ShellCompleter {
    type Hint = String;
}
impl rustyline::validate::Validator for ShellCompleter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceHandle;
    use crate::vfs::OpenOptions;
    use std::io::Cursor;
    use tokio_util::sync::CancellationToken;

    fn archive() -> VirtualFile {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in [("alpha.txt", &b"a"[..]), ("album/song", &b"s"[..]), ("beta", &b"b"[..])] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        }
        let source = SourceHandle::seekable(Cursor::new(builder.into_inner().unwrap()));
        OpenOptions::new()
            .open(&source, &CancellationToken::new())
            .unwrap()
    }

    #[test]
    fn test_complete_commands() {
        let completer = ShellCompleter::new(CompletionCache::new(archive()));
        let names: Vec<_> = completer
            .complete_command("c")
            .into_iter()
            .map(|p| p.replacement)
            .collect();
        assert_eq!(names, ["cd", "cat"]);
    }

    #[test]
    fn test_complete_paths() {
        let completer = ShellCompleter::new(CompletionCache::new(archive()));
        let all: Vec<_> = completer
            .complete_path("al", "cat")
            .into_iter()
            .map(|p| p.replacement)
            .collect();
        assert_eq!(all, ["alpha.txt", "album/"]);

        let dirs: Vec<_> = completer
            .complete_path("al", "cd")
            .into_iter()
            .map(|p| p.replacement)
            .collect();
        assert_eq!(dirs, ["album/"]);

        let nested: Vec<_> = completer
            .complete_path("album/s", "cat")
            .into_iter()
            .map(|p| p.replacement)
            .collect();
        assert_eq!(nested, ["album/song"]);
    }
}
