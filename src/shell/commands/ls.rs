use anyhow::{Result, anyhow};
use async_trait::async_trait;
use colored::*;

use super::output::print_line;
use super::{Command, ShellState};
use crate::archive::FileKind;
use crate::error::Error;
use crate::shell::{follow_link, is_directory};
use crate::vfs::{FileInfo, QueryFlags};

const LS_ATTRIBUTES: &str = "standard::*,unix::mode,time::modified";

pub struct LsCommand;

#[async_trait]
impl Command for LsCommand {
    fn name(&self) -> &str {
        "ls"
    }

    fn usage(&self) -> &str {
        "ls [-l] [PATH] - List directory contents"
    }

    async fn execute(&self, state: &mut ShellState, args: &[String]) -> Result<()> {
        let mut long_format = false;
        let mut path_arg: Option<String> = None;

        for arg in args {
            if arg == "-l" {
                long_format = true;
            } else if arg.starts_with('-') {
                return Err(anyhow!("ls: unknown option {arg}"));
            } else {
                path_arg = Some(arg.clone());
                break; // Only take the first non-flag argument
            }
        }

        // Resolve the target, splitting off a trailing wildcard segment
        let (target, filter_pattern) = match path_arg {
            Some(path) if path.contains('*') || path.contains('?') => {
                let (parent_path, pattern) = match path.rfind('/') {
                    Some(pos) => (&path[..=pos], &path[pos + 1..]),
                    None => ("", path.as_str()),
                };
                let dir = if parent_path.is_empty() {
                    state.current().clone()
                } else {
                    state.resolve(parent_path)?
                };
                (dir, Some(pattern.to_string()))
            }
            Some(path) => (state.resolve(&path)?, None),
            None => (state.current().clone(), None),
        };

        // A link to a directory lists the directory it points at
        let listed = follow_link(target.clone()).unwrap_or_else(|_| target.clone());
        if !is_directory(&listed) {
            // Listing a single file shows just that file
            let info = target.query_info(LS_ATTRIBUTES, QueryFlags::default())?;
            return Self::print_entry(&info, long_format);
        }
        let target = listed;

        if long_format {
            print_line!("{:<10} {:>10} {:<17} NAME", "MODE", "SIZE", "MODIFIED");
            print_line!("{}", "-".repeat(60));
        }

        let mut children = target.enumerate_children(LS_ATTRIBUTES, QueryFlags::nofollow())?;
        while let Some(name) = children.peek_name().map(str::to_string) {
            let item = children.next();
            if !Self::should_display(&name, &filter_pattern) {
                continue;
            }
            match item {
                Some(Ok(info)) => Self::print_entry(&info, long_format)?,
                // Only parents of other entries lack a header of their own
                Some(Err(Error::InvalidFile(_))) => {
                    if long_format {
                        print_line!(
                            "{:<10} {:>10} {:<17} {}",
                            "d?????????",
                            "-",
                            "-",
                            format!("{name}/").blue().bold()
                        );
                    } else {
                        print_line!("{}", format!("{name}/").blue().bold());
                    }
                }
                Some(Err(e)) => eprintln!("ls: {name}: {e}"),
                None => break,
            }
        }

        Ok(())
    }
}

impl LsCommand {
    fn print_entry(info: &FileInfo, long_format: bool) -> Result<()> {
        let name = info.name().unwrap_or("?");
        let display = match info.file_kind() {
            Some(FileKind::Directory) => format!("{name}/").blue().bold(),
            Some(FileKind::Symlink) => match info.symlink_target() {
                Some(target) => format!("{name} -> {target}").cyan(),
                None => name.cyan(),
            },
            _ => name.normal(),
        };

        if long_format {
            let size = match info.file_kind() {
                Some(FileKind::Regular) => {
                    humansize::format_size(info.size().unwrap_or(0), humansize::BINARY)
                }
                _ => "-".to_string(),
            };
            let modified = info
                .modified()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            print_line!(
                "{:<10} {:>10} {:<17} {}",
                format_mode(info.mode().unwrap_or(0)),
                size,
                modified,
                display
            );
        } else {
            print_line!("{display}");
        }
        Ok(())
    }

    /// Check if a filename should be displayed given an optional filter pattern
    fn should_display(filename: &str, filter_pattern: &Option<String>) -> bool {
        match filter_pattern {
            Some(pattern) => Self::matches_pattern(filename, pattern),
            None => true,
        }
    }

    /// Match a filename against a simple wildcard pattern (* and ?)
    fn matches_pattern(filename: &str, pattern: &str) -> bool {
        let name: Vec<char> = filename.chars().collect();
        let pattern: Vec<char> = pattern.chars().collect();
        Self::matches_from(&name, &pattern)
    }

    fn matches_from(name: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => name.is_empty(),
            Some(('*', rest)) => (0..=name.len()).any(|skip| Self::matches_from(&name[skip..], rest)),
            Some(('?', rest)) => !name.is_empty() && Self::matches_from(&name[1..], rest),
            Some((c, rest)) => name.first() == Some(c) && Self::matches_from(&name[1..], rest),
        }
    }
}

/// `ls -l` style mode string, e.g. `-rw-r--r--`.
pub fn format_mode(mode: u32) -> String {
    let kind = match mode & 0o170000 {
        0o040000 => 'd',
        0o120000 => 'l',
        0o020000 => 'c',
        0o060000 => 'b',
        0o010000 => 'p',
        _ => '-',
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_pattern() {
        assert!(LsCommand::matches_pattern("notes.txt", "*.txt"));
        assert!(LsCommand::matches_pattern("a.txt", "?.txt"));
        assert!(LsCommand::matches_pattern("", "*"));
        assert!(!LsCommand::matches_pattern("ab.txt", "?.txt"));
        assert!(!LsCommand::matches_pattern("notes.md", "*.txt"));
    }

    #[test]
    fn test_format_mode() {
        assert_eq!(format_mode(0o100644), "-rw-r--r--");
        assert_eq!(format_mode(0o040755), "drwxr-xr-x");
        assert_eq!(format_mode(0o120777), "lrwxrwxrwx");
    }
}
