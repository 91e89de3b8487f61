//! Traction Rec import - scheduled import of program, class and session data.
//!
//! Snapshots of remote records are fetched as JSON into dated directories and
//! imported through an external migration engine. The crate coordinates those
//! runs across independently scheduled processes:
//!
//! - a cross-process import lock held for the duration of a run,
//! - a health gate that refuses to start while migrations are busy or stuck,
//! - retention of imported snapshot backups,
//! - clean-up of paragraph records orphaned by earlier imports,
//! - a durable queue for deferred clean-up and sync imports.
//!
//! # Example
//!
//! ```rust,ignore
//! use traction_rec_import::{ImportOptions, Settings, TractionRecImport};
//!
//! #[tokio::main]
//! async fn main() -> traction_rec_import::Result<()> {
//!     let settings = Settings::load(&traction_rec_import::default_settings_path())?;
//!     let import = TractionRecImport::open(settings)?;
//!
//!     let outcome = import.run_import(ImportOptions::default()).await?;
//!     println!("Pipeline invoked: {}", outcome.pipeline_invoked());
//!
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod config;
pub mod content;
pub mod error;
pub mod fetcher;
pub mod ledger;
pub mod lock;
pub mod migration;
pub mod orchestrator;
pub mod orphans;
pub mod queue;
pub mod retention;
pub mod snapshot;
pub mod state;
pub mod worker;

mod api;

// Re-export commonly used types
pub use api::{TractionRecImport, TractionRecImportBuilder};
pub use config::{default_settings_path, ImportConfig, NetworkConfig, Settings, StateDbConfig};
pub use content::{ContentStore, NodeRecord, ParagraphRecord, SqliteContentStore};
pub use error::{ImportError, Result};
pub use fetcher::{StaticTokenProvider, TokenProvider, TractionRecClient, TractionRecFetcher};
pub use ledger::ImportLedger;
pub use lock::{ImportLock, ImportLockGuard, LockHolder};
pub use migration::{
    CommandMigrationEngine, ImportOptions, MigrationEngine, MigrationGate, MigrationTask,
    MigrationTaskStatus,
};
pub use orchestrator::{ImportOrchestrator, ImportOutcome};
pub use orphans::{OrphanReconciler, ReconcileOutcome};
pub use queue::{ClaimedItem, QueueItem, SqliteTaskQueue, TaskQueue};
pub use retention::{ExecutionContext, PruneOutcome, RetentionManager};
pub use snapshot::{SnapshotDirectory, SnapshotKind};
pub use state::StateDb;
pub use worker::{QueueWorker, WorkerSummary};
