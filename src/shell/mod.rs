pub mod commands;
pub mod completion;

use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::io::Write;
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::archive::FileKind;
use crate::error::Error;
use crate::task::Executor;
use crate::vfs::{QueryFlags, VirtualFile, VirtualPath, info};
use commands::Command;
pub use completion::{CompletionCache, ShellCompleter};

/// Symlink hops `cd` and `ls` follow before giving up.
const MAX_LINK_HOPS: usize = 8;

/// Shell state - tracks current location and provides command execution
pub struct ShellState {
    /// Directory the shell is in
    current: VirtualFile,
    /// Runs blocking archive work
    executor: Executor,
    /// Cancels in-flight archive work
    cancel: CancellationToken,
    /// Tab completion state
    completion_cache: CompletionCache,
    /// Registered commands
    commands: HashMap<String, Arc<dyn Command>>,
}

impl ShellState {
    /// Create a shell positioned at `current`
    pub fn new(current: VirtualFile, executor: Executor) -> Self {
        let completion_cache = CompletionCache::new(current.clone());

        let mut state = ShellState {
            current,
            executor,
            cancel: CancellationToken::new(),
            completion_cache,
            commands: HashMap::new(),
        };

        // Register commands
        state.register_command(Arc::new(commands::ls::LsCommand));
        state.register_command(Arc::new(commands::cd::CdCommand));
        state.register_command(Arc::new(commands::cat::CatCommand));
        state.register_command(Arc::new(commands::stat::StatCommand));

        state
    }

    /// Register a command
    fn register_command(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.name().to_string(), command);
    }

    /// Execute a command line
    pub async fn execute(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        // Check if there's a pipe in the command
        let (command_part, pipeline_part) = Self::split_pipeline(line);

        if let Some(pipeline) = pipeline_part {
            // Execute command with output piped to shell
            self.execute_with_pipe(&command_part, &pipeline).await
        } else {
            // Normal execution
            self.execute_internal(line).await
        }
    }

    /// Execute a command with its output piped to a shell command
    #[cfg(unix)]
    async fn execute_with_pipe(&mut self, command: &str, pipeline: &str) -> Result<()> {
        use std::os::unix::io::AsRawFd;

        // Spawn shell process with the pipeline
        let mut child = ProcessCommand::new("sh")
            .arg("-c")
            .arg(pipeline)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn shell: {}", e))?;

        // Get stdin handle
        let child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Failed to open stdin"))?;
        let child_fd = child_stdin.as_raw_fd();

        // Save the original stdout
        let stdout_fd = std::io::stdout().as_raw_fd();
        let saved_stdout = unsafe { libc::dup(stdout_fd) };
        if saved_stdout < 0 {
            drop(child_stdin);
            child.kill().ok();
            return Err(anyhow!("Failed to duplicate stdout"));
        }

        // Redirect stdout to the pipe's stdin
        let dup_result = unsafe { libc::dup2(child_fd, stdout_fd) };
        if dup_result < 0 {
            unsafe {
                libc::close(saved_stdout);
            }
            drop(child_stdin);
            child.kill().ok();
            return Err(anyhow!("Failed to redirect stdout"));
        }

        // Execute the command (it will write to the redirected stdout)
        let result = self.execute_internal(command).await;

        // Flush stdout to ensure all data is sent
        let _ = std::io::stdout().flush();

        // Restore original stdout
        unsafe {
            libc::dup2(saved_stdout, stdout_fd);
        }
        unsafe {
            libc::close(saved_stdout);
        }

        // Close the pipe to signal EOF to the child
        drop(child_stdin);

        // Wait for the child process
        let _status = child
            .wait()
            .map_err(|e| anyhow!("Failed to wait for child: {}", e))?;

        // Return the command's result
        // Ignore the child's exit status - it's ok if grep finds nothing, head exits early, etc.
        result
    }

    #[cfg(not(unix))]
    async fn execute_with_pipe(&mut self, _command: &str, _pipeline: &str) -> Result<()> {
        Err(anyhow!("Pipe support is only available on Unix systems"))
    }

    /// Internal execute for normal (non-piped) commands
    async fn execute_internal(&mut self, line: &str) -> Result<()> {
        // Parse command line respecting quotes
        let parts = Self::parse_command_line(line)?;

        if parts.is_empty() {
            return Ok(());
        }

        let cmd_name = &parts[0];
        let args = &parts[1..];

        // Check for built-in commands first
        match cmd_name.as_str() {
            "exit" | "quit" => {
                return Err(anyhow!("exit"));
            }
            "help" => {
                self.print_help();
                return Ok(());
            }
            "pwd" => {
                println!("{}", self.current_path());
                return Ok(());
            }
            _ => {}
        }

        // Look up command
        if let Some(command) = self.commands.get(cmd_name) {
            let cmd = Arc::clone(command);
            cmd.execute(self, args).await
        } else {
            Err(anyhow!("Unknown command: {cmd_name}"))
        }
    }

    /// Get the current directory
    pub fn current(&self) -> &VirtualFile {
        &self.current
    }

    /// Set the current directory
    pub fn set_current(&mut self, file: VirtualFile) {
        self.completion_cache.set_current(file.clone());
        self.current = file;
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Get the completion cache
    pub fn completion_cache(&self) -> &CompletionCache {
        &self.completion_cache
    }

    /// Resolve `path` against the current directory
    pub fn resolve(&self, path: &str) -> Result<VirtualFile> {
        self.current
            .resolve(path)
            .with_context(|| format!("cannot access '{path}'"))
    }

    /// Get the current virtual path
    pub fn current_path(&self) -> VirtualPath {
        self.current.path().unwrap_or_else(VirtualPath::root)
    }

    /// Print help message
    fn print_help(&self) {
        println!("Available commands:");
        println!("  ls [-l] [PATH] - List contents");
        println!("  cd PATH        - Change directory");
        println!("  cat FILE...    - Display file contents");
        println!("  stat PATH      - Show entry metadata");
        println!("  pwd            - Print working directory");
        println!("  help           - Show this help");
        println!("  exit/quit      - Exit the shell");
        println!();
        println!("Pipe support:");
        println!("  You can pipe command output to external tools:");
        println!("  ls | grep pattern");
        println!("  cat config.json | jq .");
        println!("  cat large.log | less");
    }

    /// Get the prompt string
    pub fn prompt(&self) -> String {
        format!("arkfs:{} $ ", self.current_path())
    }

    /// Split command line on first unquoted pipe character
    /// Returns (command, Some(pipeline)) or (command, None)
    fn split_pipeline(line: &str) -> (String, Option<String>) {
        let mut in_single_quote = false;
        let mut in_double_quote = false;
        let mut escape_next = false;

        for (i, ch) in line.char_indices() {
            if escape_next {
                escape_next = false;
                continue;
            }

            match ch {
                '\\' if !in_single_quote => {
                    escape_next = true;
                }
                '\'' if !in_double_quote => {
                    in_single_quote = !in_single_quote;
                }
                '"' if !in_single_quote => {
                    in_double_quote = !in_double_quote;
                }
                '|' if !in_single_quote && !in_double_quote => {
                    // Found first unquoted pipe
                    let command = line[..i].trim().to_string();
                    let pipeline = line[i + 1..].trim().to_string();
                    return (command, Some(pipeline));
                }
                _ => {}
            }
        }

        // No pipe found
        (line.to_string(), None)
    }

    /// Parse command line respecting quotes (both single and double)
    fn parse_command_line(line: &str) -> Result<Vec<String>> {
        let mut args = Vec::new();
        let mut current_arg = String::new();
        let mut in_single_quote = false;
        let mut in_double_quote = false;
        let mut escape_next = false;

        for ch in line.chars() {
            if escape_next {
                current_arg.push(ch);
                escape_next = false;
                continue;
            }

            match ch {
                '\\' if !in_single_quote => {
                    escape_next = true;
                }
                '\'' if !in_double_quote => {
                    in_single_quote = !in_single_quote;
                }
                '"' if !in_single_quote => {
                    in_double_quote = !in_double_quote;
                }
                ' ' | '\t' if !in_single_quote && !in_double_quote => {
                    if !current_arg.is_empty() {
                        args.push(current_arg.clone());
                        current_arg.clear();
                    }
                }
                _ => {
                    current_arg.push(ch);
                }
            }
        }

        // Push the last argument
        if !current_arg.is_empty() {
            args.push(current_arg);
        }

        // Check for unclosed quotes
        if in_single_quote {
            return Err(anyhow!("Unclosed single quote"));
        }
        if in_double_quote {
            return Err(anyhow!("Unclosed double quote"));
        }

        Ok(args)
    }
}

/// Where `file` leads: the entry a symlink points at, or `file` itself.
pub fn follow_link(file: VirtualFile) -> Result<VirtualFile> {
    let mut current = file;
    for _ in 0..MAX_LINK_HOPS {
        let link = match current.query_info(info::STANDARD_SYMLINK_TARGET, QueryFlags::nofollow()) {
            Ok(info) => info.symlink_target().map(str::to_string),
            Err(_) => None,
        };
        let Some(link) = link else {
            return Ok(current);
        };
        let parent = current
            .parent()
            .ok_or_else(|| anyhow!("Cannot follow link: {link}"))?;
        current = parent
            .resolve(&link)
            .with_context(|| format!("broken link to '{link}'"))?;
    }
    Err(anyhow!("Too many levels of symbolic links"))
}

/// Whether `file` can be listed and entered.
///
/// Nodes without an archive header of their own only exist as parents of
/// other entries, so they count as directories.
pub fn is_directory(file: &VirtualFile) -> bool {
    if file.is_root() {
        return true;
    }
    match file.query_info(info::STANDARD_TYPE, QueryFlags::default()) {
        Ok(info) => info.file_kind() == Some(FileKind::Directory),
        Err(Error::InvalidFile(_)) => file.exists(),
        Err(_) => false,
    }
}
