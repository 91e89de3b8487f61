//! Entry point wiring the import components together from [`Settings`].

use crate::config::{ImportConfig, Settings};
use crate::content::{ContentStore, SqliteContentStore};
use crate::fetcher::{StaticTokenProvider, TokenProvider, TractionRecClient, TractionRecFetcher};
use crate::ledger::ImportLedger;
use crate::lock::{ImportLock, LockHolder};
use crate::migration::{CommandMigrationEngine, ImportOptions, MigrationEngine};
use crate::orchestrator::{ImportOrchestrator, ImportOutcome};
use crate::orphans::{OrphanReconciler, ReconcileOutcome};
use crate::queue::{SqliteTaskQueue, TaskQueue};
use crate::retention::{ExecutionContext, PruneOutcome, RetentionManager};
use crate::state::StateDb;
use crate::worker::{QueueWorker, WorkerSummary};
use crate::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Builder for [`TractionRecImport`].
///
/// Components left unset are created from the settings: the state and content
/// databases are opened at `state_db_path` and `content_db_path`, and
/// migrations run through `migrate_command`.
pub struct TractionRecImportBuilder {
    settings: Settings,
    context: ExecutionContext,
    engine: Option<Arc<dyn MigrationEngine>>,
    content: Option<Arc<dyn ContentStore>>,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl TractionRecImportBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            context: ExecutionContext::Batch,
            engine: None,
            content: None,
            tokens: None,
        }
    }

    /// Default: [`ExecutionContext::Batch`]
    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    pub fn migration_engine(mut self, engine: Arc<dyn MigrationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn content_store(mut self, content: Arc<dyn ContentStore>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn build(self) -> Result<TractionRecImport> {
        self.settings.validate()?;
        let settings = Arc::new(self.settings);

        let state = StateDb::open_at(&settings.state_db_path)?;
        let lock = ImportLock::new(state.clone());
        let ledger = ImportLedger::new(state.clone());
        let queue: Arc<dyn TaskQueue> =
            Arc::new(SqliteTaskQueue::new(state, ImportConfig::QUEUE_NAME));

        let engine = match self.engine {
            Some(engine) => engine,
            None => Arc::new(CommandMigrationEngine::new(
                &settings.migrate_command,
                settings.migrate_command_args.clone(),
            )),
        };
        let content = match self.content {
            Some(content) => content,
            None => Arc::new(SqliteContentStore::open_at(&settings.content_db_path)?),
        };
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(StaticTokenProvider::from_settings(&settings)));

        let orchestrator = Arc::new(ImportOrchestrator::new(
            Arc::clone(&settings),
            lock,
            ledger,
            engine,
            Arc::clone(&content),
            Arc::clone(&queue),
        ));

        Ok(TractionRecImport {
            settings,
            context: self.context,
            orchestrator,
            content,
            queue,
            tokens,
        })
    }
}

/// One process's handle on the import pipeline.
///
/// Each method corresponds to one operator command.
pub struct TractionRecImport {
    settings: Arc<Settings>,
    context: ExecutionContext,
    orchestrator: Arc<ImportOrchestrator>,
    content: Arc<dyn ContentStore>,
    queue: Arc<dyn TaskQueue>,
    tokens: Arc<dyn TokenProvider>,
}

impl TractionRecImport {
    /// Build with every component derived from `settings`.
    pub fn open(settings: Settings) -> Result<Self> {
        TractionRecImportBuilder::new(settings).build()
    }

    pub fn builder(settings: Settings) -> TractionRecImportBuilder {
        TractionRecImportBuilder::new(settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn orchestrator(&self) -> &ImportOrchestrator {
        &self.orchestrator
    }

    pub fn queue(&self) -> &dyn TaskQueue {
        self.queue.as_ref()
    }

    pub async fn run_import(&self, options: ImportOptions) -> Result<ImportOutcome> {
        self.orchestrator.run_import(options).await
    }

    pub async fn rollback(&self) {
        self.orchestrator.rollback().await
    }

    pub fn flush_sessions(&self) -> Result<usize> {
        self.orchestrator.flush_sessions()
    }

    pub fn reset_lock(&self) -> Result<()> {
        self.orchestrator.reset_lock()
    }

    pub fn lock_status(&self) -> Result<Option<LockHolder>> {
        self.orchestrator.lock().holder()
    }

    /// Prune the backup directory down to `backup_limit` entries.
    pub fn clean_up(&self) -> PruneOutcome {
        self.retention().prune_backups(self.settings.backup_limit)
    }

    /// Delete up to `limit` orphaned paragraphs.
    pub fn db_clean_up(&self, limit: usize) -> ReconcileOutcome {
        OrphanReconciler::new(Arc::clone(&self.content)).reconcile(limit)
    }

    /// Fetcher for a new snapshot directory.
    pub fn fetcher(&self) -> Result<TractionRecFetcher> {
        let client = TractionRecClient::new(&self.settings, Arc::clone(&self.tokens))?;
        Ok(TractionRecFetcher::new(&self.settings, client))
    }

    /// Fetch a full snapshot. `None` when the fetcher is disabled.
    pub async fn fetch_all(&self) -> Result<Option<PathBuf>> {
        if !self.settings.fetcher_enabled {
            info!("Fetcher is disabled!");
            return Ok(None);
        }
        self.fetcher()?.fetch().await.map(Some)
    }

    pub fn queue_cleanup(&self) -> Result<i64> {
        self.orchestrator.queue_cleanup()
    }

    /// Fetch a full snapshot and queue a sync import of it.
    ///
    /// Returns the queue item id, or `None` when the fetcher is disabled.
    pub async fn queue_import_sync(&self) -> Result<Option<i64>> {
        let Some(directory) = self.fetch_all().await? else {
            return Ok(None);
        };
        self.orchestrator.queue_sync_import(directory).map(Some)
    }

    /// Process queued items.
    pub async fn run_queue(&self, max_items: Option<usize>) -> Result<WorkerSummary> {
        QueueWorker::new(
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.queue),
            self.retention(),
        )
        .run(max_items)
        .await
    }

    fn retention(&self) -> RetentionManager {
        RetentionManager::new(&self.settings, self.context)
    }
}
