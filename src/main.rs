use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use dix::config::{IndexerConfig, Storage};
use dix::events::{self, StatusEvent};
use dix::registry::{DirState, DirectoryRegistry};

#[derive(Parser)]
#[command(name = "dix")]
#[command(about = "Incremental directory indexing for local search")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a directory once and exit
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Discard existing index state and rebuild from scratch
        #[arg(short, long)]
        force: bool,
    },
    /// Index directories and keep their indexes live until interrupted
    Watch {
        #[arg(default_value = ".", num_args = 1..)]
        paths: Vec<PathBuf>,
    },
    /// Query a directory's index
    Query {
        path: PathBuf,

        /// Query text
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Show status for one directory
    Status {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// List all stored indexes
    List,
    /// Remove a directory's index
    Remove { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("DIX_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = IndexerConfig::load();
    let storage = Storage::default_location()?;

    match cli.command {
        Commands::Index { path, force } => {
            let (events, _rx) = events::channel();
            let registry = DirectoryRegistry::new(config, storage, events);

            registry.register(&path, false)?;
            if force {
                registry.wait_ready(&path, Duration::from_secs(600))?;
                registry.reindex(&path)?;
            }
            let snapshot = registry.wait_ready(&path, Duration::from_secs(600))?;

            match snapshot.state {
                DirState::Ready => {
                    println!("Indexed {} ({} files)", path.display(), snapshot.stats.file_count);
                }
                _ => {
                    anyhow::bail!(
                        "indexing failed: {}",
                        snapshot.error.unwrap_or_else(|| "unknown error".into())
                    );
                }
            }
            registry.shutdown();
        }

        Commands::Watch { paths } => {
            let (events, rx) = events::channel();
            let registry = DirectoryRegistry::new(config, storage, events);

            for path in &paths {
                registry.register(path, true)?;
                println!("Watching {}", path.display());
            }

            // Runs until interrupted. Abrupt exit is safe: manifest
            // writes are atomic, so at most the batch in flight is
            // redone on the next run.
            for event in rx {
                match event {
                    StatusEvent::StateChanged { dir_id, state, error } => match error {
                        Some(e) => println!("[{dir_id}] {state:?}: {e}"),
                        None => println!("[{dir_id}] {state:?}"),
                    },
                    StatusEvent::BatchApplied { dir_id, indexed, failed } => {
                        println!("[{dir_id}] indexed {indexed} file(s), {failed} failed");
                    }
                    StatusEvent::WatcherError { dir_id, message } => {
                        println!("[{dir_id}] watcher error: {message}");
                    }
                    StatusEvent::FileMissing { dir_id, path } => {
                        println!("[{dir_id}] missing: {}", path.display());
                    }
                    StatusEvent::StatsUpdated { .. } => {}
                }
            }
        }

        Commands::Query { path, query, limit } => {
            let (events, _rx) = events::channel();
            let registry = DirectoryRegistry::new(config, storage, events);

            registry.register(&path, false)?;
            registry.wait_ready(&path, Duration::from_secs(600))?;

            let text = query.join(" ");
            let hits = registry.query(&path, &text, limit)?;
            if hits.is_empty() {
                println!("No results for '{text}'");
            }
            for hit in hits {
                println!(
                    "{}#{} ({:.2}): {}",
                    hit.source.display(),
                    hit.chunk_index,
                    hit.score,
                    hit.snippet.replace('\n', " ")
                );
            }
            registry.shutdown();
        }

        Commands::Status { path } => {
            let (events, _rx) = events::channel();
            let registry = DirectoryRegistry::new(config, storage, events);

            registry.register(&path, false)?;
            let snapshot = registry.wait_ready(&path, Duration::from_secs(600))?;

            println!("Directory: {}", snapshot.root.display());
            println!("State: {:?}", snapshot.state);
            if let Some(error) = &snapshot.error {
                println!("Error: {error}");
            }
            if let Some(summary) = &snapshot.summary {
                println!("Summary: {summary}");
            }
            println!("Files: {}", snapshot.stats.file_count);
            println!("Total size: {} bytes", snapshot.stats.total_size);
            for (ext, count) in &snapshot.stats.types {
                println!("  .{ext}: {count}");
            }
            registry.shutdown();
        }

        Commands::List => {
            let indexes = storage.list_indexes()?;
            if indexes.is_empty() {
                println!("No indexes found");
            }
            for info in indexes {
                println!("{}", info.root_path.display());
            }
        }

        Commands::Remove { path } => {
            let root = path.canonicalize().unwrap_or(path);
            storage.remove_index(&root)?;
            println!("Removed index for: {}", root.display());
        }
    }

    Ok(())
}
