//! Traction Rec CLI - operator and cron entry points for the import pipeline.
//!
//! Every subcommand is a single short-lived run. Runs coordinate through the
//! import lock and queue kept in the state database, so several may be
//! scheduled independently.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use traction_rec_import::{
    default_settings_path, ImportConfig, ImportOptions, ImportOutcome, PruneOutcome,
    ReconcileOutcome, Settings, TractionRecImport,
};

#[derive(Parser, Debug)]
#[command(name = "traction-rec")]
#[command(about = "Import Traction Rec programs, classes and sessions")]
struct Args {
    /// Settings file (defaults to <config dir>/traction-rec/settings.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every pending JSON snapshot
    Import {
        /// Delete destination records that no longer exist in the source
        #[arg(long)]
        sync: bool,
    },
    /// Roll back the import migrations
    Rollback,
    /// Remove all sessions
    SessionFlush,
    /// Clear the import lock left behind by a crashed run
    ResetLock,
    /// Show who holds the import lock
    LockStatus,
    /// Prune old JSON backups
    CleanUp,
    /// Remove orphaned paragraphs
    DbCleanUp {
        /// Max number of paragraphs to remove in one run
        #[arg(long, default_value_t = ImportConfig::DEFAULT_ORPHAN_LIMIT, value_parser = parse_limit)]
        limit: usize,
    },
    /// Fetch all Traction Rec data into a new JSON snapshot
    FetchAll,
    /// Queue a backup clean up
    QueueCleanUp,
    /// Fetch all data and queue a sync import of it
    QueueImportSync,
    /// Process queued clean up and sync items
    QueueRun {
        /// Stop after this many items
        #[arg(long)]
        max_items: Option<usize>,
    },
}

fn parse_limit(value: &str) -> std::result::Result<usize, String> {
    match value.parse::<usize>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(format!("'{value}' is not a positive integer")),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Set up logging; stdout is reserved for command output
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config_path = args.config.unwrap_or_else(default_settings_path);
    debug!("Loading settings from {}", config_path.display());
    let settings = Settings::load(&config_path)
        .with_context(|| format!("Failed to load settings from {}", config_path.display()))?;

    let import = TractionRecImport::open(settings)?;
    run(&import, args.command).await
}

/// Line printed to stdout before a subcommand starts.
fn start_message(command: &Command) -> &'static str {
    match command {
        Command::Import { .. } => "Starting Traction Rec migration",
        Command::Rollback => "Rolling back Traction Rec migrations...",
        Command::SessionFlush => "Removing sessions...",
        Command::ResetLock => "Reset import status...",
        Command::LockStatus => "Checking import lock...",
        Command::CleanUp => "Starting clean up...",
        Command::DbCleanUp { .. } => "Starting database clean up...",
        Command::FetchAll => "Starting Traction Rec fetch...",
        Command::QueueCleanUp => "Queueing clean up...",
        Command::QueueImportSync => "Fetching Traction Rec data for a sync import...",
        Command::QueueRun { .. } => "Processing queued items...",
    }
}

async fn run(import: &TractionRecImport, command: Command) -> Result<ExitCode> {
    println!("{}", start_message(&command));
    match command {
        Command::Import { sync } => {
            let outcome = import.run_import(ImportOptions { sync }).await?;
            match outcome {
                ImportOutcome::Completed { imported, failed } => {
                    println!(
                        "Traction Rec migration done! {} imported, {} failed",
                        imported.len(),
                        failed.len()
                    );
                    Ok(ExitCode::SUCCESS)
                }
                _ => {
                    println!("Traction Rec migration did not run");
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Rollback => {
            import.rollback().await;
            println!("Rollback finished!");
            Ok(ExitCode::SUCCESS)
        }

        Command::SessionFlush => {
            let deleted = import.flush_sessions()?;
            println!("Removed {} sessions", deleted);
            Ok(ExitCode::SUCCESS)
        }

        Command::ResetLock => {
            import.reset_lock()?;
            println!("Import status reset!");
            Ok(ExitCode::SUCCESS)
        }

        Command::LockStatus => {
            match import.lock_status()? {
                Some(holder) => println!(
                    "Import lock held by {} since {}",
                    holder.holder, holder.acquired_at
                ),
                None => println!("Import lock is free"),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::CleanUp => {
            let outcome = import.clean_up();
            println!("Clean up finished!");
            match outcome {
                PruneOutcome::Failed { .. } => Ok(ExitCode::FAILURE),
                PruneOutcome::Skipped | PruneOutcome::Completed { .. } => Ok(ExitCode::SUCCESS),
            }
        }

        Command::DbCleanUp { limit } => {
            let outcome = import.db_clean_up(limit);
            println!("Database clean up finished!");
            match outcome {
                ReconcileOutcome::Aborted { .. } => Ok(ExitCode::FAILURE),
                ReconcileOutcome::NothingToDo | ReconcileOutcome::Completed { .. } => {
                    Ok(ExitCode::SUCCESS)
                }
            }
        }

        Command::FetchAll => {
            match import.fetch_all().await? {
                Some(directory) => {
                    println!("Fetched Traction Rec data into {}", directory.display());
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("Fetch skipped, fetcher is disabled");
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::QueueCleanUp => {
            let item_id = import.queue_cleanup()?;
            println!("Queued clean up as item {}", item_id);
            Ok(ExitCode::SUCCESS)
        }

        Command::QueueImportSync => {
            match import.queue_import_sync().await {
                Ok(Some(item_id)) => {
                    println!("Queued sync import as item {}", item_id);
                    Ok(ExitCode::SUCCESS)
                }
                Ok(None) => {
                    println!("Sync import not queued, fetcher is disabled");
                    Ok(ExitCode::FAILURE)
                }
                Err(e) => {
                    error!("{}", e);
                    println!("Sync import not queued");
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::QueueRun { max_items } => {
            let summary = import.run_queue(max_items).await?;
            println!(
                "Processed {} queue items ({} released, {} invalid)",
                summary.processed, summary.released, summary.invalid
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}
