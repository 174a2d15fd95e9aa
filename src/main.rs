use anyhow::{Context, anyhow};
use arkfs::{CacheLevel, CancellationToken, Executor, OpenOptions, SourceHandle, shell};
use clap::Parser;
use colored::*;
use rustyline::Editor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

/// Browse a tar archive (optionally gzip or bzip2 compressed) like a directory tree
#[derive(Parser, Debug)]
#[command(name = "arkfs", version, about)]
struct Args {
    /// Archive to open; `-` reads standard input (requires --cache full)
    archive: String,

    /// Content cache level: none, on-demand or full
    #[arg(long, default_value_t = CacheLevel::OnDemand)]
    cache: CacheLevel,

    /// Directory inside the archive to start in
    #[arg(long, default_value = "/")]
    path: String,

    /// Run a command and exit instead of starting the shell (repeatable)
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ARKFS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let source = if args.archive == "-" {
        SourceHandle::sequential(std::io::stdin())
    } else {
        SourceHandle::open_file(&args.archive)
            .with_context(|| format!("cannot open '{}'", args.archive))?
    };

    let executor = Executor::current();
    let cancel = CancellationToken::new();
    let root = OpenOptions::new()
        .cache_level(args.cache)
        .path(&args.path)
        .open_async(&source, &executor, &cancel)
        .await
        .with_context(|| format!("failed to read archive '{}'", args.archive))?;
    if !root.exists() {
        return Err(anyhow!("{}: no such path in archive", args.path));
    }
    if !shell::is_directory(&root) {
        return Err(anyhow!("{}: not a directory", args.path));
    }

    let mut state = shell::ShellState::new(root, executor);

    // One-shot mode
    if !args.commands.is_empty() {
        for command in &args.commands {
            if let Err(e) = state.execute(command).await {
                if e.to_string() == "exit" {
                    break;
                }
                eprintln!("{} {:#}", "Error:".red().bold(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Print welcome message
    println!("{}", "=".repeat(60).cyan());
    println!("{}", "  arkfs - Browse archives like a filesystem".bold().cyan());
    println!("{}", format!("  {} (cache: {})", args.archive, args.cache).cyan());
    println!("{}", "=".repeat(60).cyan());
    println!();
    println!("Type 'help' for available commands or 'exit' to quit");
    println!();

    // Create readline editor with tab completion
    let completer = shell::ShellCompleter::new(state.completion_cache().clone());
    let mut rl = Editor::new()?;
    rl.set_helper(Some(completer));

    // Load history if available
    let history_file = dirs::home_dir().map(|mut p| {
        p.push(".arkfs_history");
        p
    });

    if let Some(path) = &history_file {
        let _ = rl.load_history(path);
    }

    // REPL loop
    loop {
        let prompt = state.prompt();

        match rl.readline(&prompt) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());

                match state.execute(&line).await {
                    Ok(_) => {}
                    Err(e) => {
                        if e.to_string() == "exit" {
                            break;
                        }
                        eprintln!("{} {:#}", "Error:".red().bold(), e);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl-D
                println!("exit");
                break;
            }
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red().bold(), err);
                break;
            }
        }
    }

    // Save history
    if let Some(path) = &history_file {
        let _ = rl.save_history(path);
    }

    println!("Goodbye!");
    Ok(())
}
