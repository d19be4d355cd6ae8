//! filehist - local file history from the command line.
//!
//! ## Commands
//!
//! - `snapshot`: capture a history entry for a file
//! - `list`: show the retained entries for a file
//! - `tracked`: list every file with history
//! - `move`: move or rename a file together with its history
//! - `clear`: delete the entire history store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use url::Url;

use filehist_core::{
    EntrySource, FlushPolicy, HistoryRegistry, LocalFileService, NoRemoteEnvironment,
    PathLabelService, StaticConfiguration,
};

#[derive(Parser)]
#[command(name = "filehist")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Local file history: snapshot, browse and migrate save history", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// History store root (default: .filehist in the current directory)
    #[arg(long, global = true, env = "FILEHIST_HOME")]
    home: Option<PathBuf>,

    /// Retention cap: maximum entries kept per file
    #[arg(long, global = true, default_value_t = 50)]
    max_entries: usize,

    /// Merge window in seconds for consecutive saves
    #[arg(long, global = true, default_value_t = 10)]
    merge_window: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a history entry for a file
    Snapshot {
        /// File to snapshot
        file: PathBuf,

        /// Optional description stored with the entry
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show the retained entries for a file
    List {
        /// File whose history to show
        file: PathBuf,
    },

    /// List every file known to have history
    Tracked,

    /// Move or rename a file together with its history
    Move {
        /// Current path
        from: PathBuf,

        /// New path
        to: PathBuf,
    },

    /// Delete the entire history store
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    filehist_core::init_tracing(cli.json, level);

    let home = match cli.home {
        Some(home) => home,
        None => std::env::current_dir()?.join(".filehist"),
    };
    let registry = Arc::new(HistoryRegistry::new(
        home,
        Arc::new(LocalFileService::new()),
        Arc::new(StaticConfiguration::new(cli.max_entries, cli.merge_window)),
        Arc::new(PathLabelService),
        Arc::new(NoRemoteEnvironment),
        // The process exits right after each command; write eagerly.
        FlushPolicy::Eager,
    ));
    let token = CancellationToken::new();

    match cli.command {
        Commands::Snapshot { file, message } => snapshot(&registry, &file, message, &token).await,
        Commands::List { file } => list(&registry, &file, &token).await,
        Commands::Tracked => tracked(&registry, &token).await,
        Commands::Move { from, to } => move_file(&registry, &from, &to, &token).await,
        Commands::Clear => clear(&registry, &token).await,
    }
}

async fn snapshot(
    registry: &HistoryRegistry,
    file: &Path,
    message: Option<String>,
    token: &CancellationToken,
) -> Result<()> {
    let resource = file_url(file)?;
    let entry = registry
        .add_entry(&resource, EntrySource::FileSaved, message, token)
        .await
        .ok_or_else(|| anyhow!("no history entry captured for {}", file.display()))?;
    println!("{}  {}", entry.id, format_timestamp(entry.timestamp));
    Ok(())
}

async fn list(registry: &HistoryRegistry, file: &Path, token: &CancellationToken) -> Result<()> {
    let resource = file_url(file)?;
    let entries = registry.get_entries(&resource, token).await;
    if entries.is_empty() {
        println!("no history for {}", file.display());
        return Ok(());
    }
    for entry in entries {
        let description = entry
            .source_description
            .map(|d| format!("  ({d})"))
            .unwrap_or_default();
        println!(
            "{}  {}  {}{}",
            entry.id,
            format_timestamp(entry.timestamp),
            entry.source.label(),
            description,
        );
    }
    Ok(())
}

async fn tracked(registry: &HistoryRegistry, token: &CancellationToken) -> Result<()> {
    let resources = registry.get_all(token).await;
    if resources.is_empty() {
        println!("no files are tracked");
        return Ok(());
    }
    for resource in resources {
        match resource.to_file_path() {
            Ok(path) => println!("{}", path.display()),
            Err(_) => println!("{resource}"),
        }
    }
    Ok(())
}

async fn move_file(
    registry: &HistoryRegistry,
    from: &Path,
    to: &Path,
    token: &CancellationToken,
) -> Result<()> {
    let source = file_url(from)?;
    // Load the model before the resource disappears from disk so its
    // history migrates too.
    let _ = registry.get_model(&source).await.has_entries(false).await;

    tokio::fs::rename(from, to)
        .await
        .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))?;

    let target = file_url(to)?;
    let moved = registry.move_entries(&source, &target, token).await?;
    println!("moved history for {} resource(s)", moved.len());
    Ok(())
}

async fn clear(registry: &HistoryRegistry, token: &CancellationToken) -> Result<()> {
    registry.remove_all(token).await?;
    println!("history store cleared");
    Ok(())
}

/// Absolute `file://` URL for a path; resolves symlinks when the path
/// exists so the same file always maps to the same snapshot folder.
fn file_url(path: &Path) -> Result<Url> {
    let absolute = match std::fs::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(_) => {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()?.join(path)
            }
        }
    };
    Url::from_file_path(&absolute)
        .map_err(|_| anyhow!("not a representable file path: {}", path.display()))
}

fn format_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}
