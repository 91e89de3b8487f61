//! Import orchestration: lock, gate, and per-directory migration runs.

use crate::config::{ImportConfig, Settings};
use crate::content::ContentStore;
use crate::ledger::ImportLedger;
use crate::lock::{ImportLock, ImportLockGuard};
use crate::migration::{ImportOptions, MigrationEngine, MigrationGate};
use crate::queue::{QueueItem, TaskQueue};
use crate::snapshot::{archive_snapshot, list_snapshot_directories, SnapshotDirectory};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a call to [`ImportOrchestrator::run_import`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    Disabled,
    AlreadyRunning,
    MigrationsUnhealthy,
    NothingToImport,
    Completed {
        imported: Vec<PathBuf>,
        failed: Vec<PathBuf>,
    },
}

impl ImportOutcome {
    /// Whether the migration pipeline ran for at least one directory.
    pub fn pipeline_invoked(&self) -> bool {
        matches!(self, ImportOutcome::Completed { .. })
    }
}

enum Entry<'a> {
    Proceed(ImportLockGuard<'a>),
    Stop(ImportOutcome),
}

/// Drives snapshot directories through the migration engine.
pub struct ImportOrchestrator {
    settings: Arc<Settings>,
    lock: ImportLock,
    ledger: ImportLedger,
    gate: MigrationGate,
    engine: Arc<dyn MigrationEngine>,
    content: Arc<dyn ContentStore>,
    queue: Arc<dyn TaskQueue>,
}

impl ImportOrchestrator {
    pub fn new(
        settings: Arc<Settings>,
        lock: ImportLock,
        ledger: ImportLedger,
        engine: Arc<dyn MigrationEngine>,
        content: Arc<dyn ContentStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let gate = MigrationGate::new(Arc::clone(&engine), settings.migrate_group.clone());
        Self {
            settings,
            lock,
            ledger,
            gate,
            engine,
            content,
            queue,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn lock(&self) -> &ImportLock {
        &self.lock
    }

    pub fn is_import_enabled(&self) -> bool {
        self.settings.import_enabled
    }

    /// Snapshot directories waiting in the JSON directory, oldest first.
    pub fn list_importable_directories(&self) -> Result<Vec<SnapshotDirectory>> {
        list_snapshot_directories(&self.settings.json_directory)
    }

    /// Import every pending snapshot directory.
    pub async fn run_import(&self, options: ImportOptions) -> Result<ImportOutcome> {
        let guard = match self.enter().await? {
            Entry::Proceed(guard) => guard,
            Entry::Stop(outcome) => return Ok(outcome),
        };

        // An error listing directories drops the guard, which releases the lock.
        let dirs = self.list_importable_directories()?;
        if dirs.is_empty() {
            info!("Nothing to import.");
            guard.release()?;
            return Ok(ImportOutcome::NothingToImport);
        }

        info!("Starting Traction Rec migration of {} directories", dirs.len());
        let outcome = self.import_directories(&dirs, options).await;

        guard.release()?;
        info!("Traction Rec migration done!");
        Ok(outcome)
    }

    /// Import one named directory under the same lock and gate discipline.
    ///
    /// Used for queued sync items, which name the directory explicitly.
    pub async fn import_directory(
        &self,
        directory: &Path,
        options: ImportOptions,
    ) -> Result<ImportOutcome> {
        let guard = match self.enter().await? {
            Entry::Proceed(guard) => guard,
            Entry::Stop(outcome) => return Ok(outcome),
        };

        if !directory.is_dir() {
            info!("Nothing to import: {} is gone", directory.display());
            guard.release()?;
            return Ok(ImportOutcome::NothingToImport);
        }

        let Some(snapshot) = SnapshotDirectory::from_path(directory) else {
            warn!(
                "Nothing to import: {} is not a snapshot directory",
                directory.display()
            );
            guard.release()?;
            return Ok(ImportOutcome::NothingToImport);
        };

        let outcome = self.import_directories(&[snapshot], options).await;
        guard.release()?;
        Ok(outcome)
    }

    /// Enabled flag, lock, then migration health, in that order.
    ///
    /// The lock is only held on `Proceed`.
    async fn enter(&self) -> Result<Entry<'_>> {
        if !self.is_import_enabled() {
            info!("Traction Rec import is not enabled!");
            return Ok(Entry::Stop(ImportOutcome::Disabled));
        }

        let Some(guard) = self.lock.try_guard()? else {
            info!("Can't run new import, another import process already in progress.");
            return Ok(Entry::Stop(ImportOutcome::AlreadyRunning));
        };

        if !self.gate.check_migrations_status().await {
            warn!("One or more migrations are still running or stuck.");
            guard.release()?;
            return Ok(Entry::Stop(ImportOutcome::MigrationsUnhealthy));
        }

        Ok(Entry::Proceed(guard))
    }

    /// Run each directory in order; one directory's failure does not stop the rest.
    ///
    /// A directory already in the ledger was imported by an earlier run that
    /// could not archive it; only the archive step is retried for it.
    async fn import_directories(
        &self,
        dirs: &[SnapshotDirectory],
        options: ImportOptions,
    ) -> ImportOutcome {
        let mut imported = Vec::new();
        let mut failed = Vec::new();

        for dir in dirs {
            if self.already_imported(dir) {
                info!("{} was already imported, retrying archive", dir.name());
                self.archive(dir);
                continue;
            }

            debug!(
                "Importing {} with {:?} (sync: {})",
                dir.path.display(),
                dir.kinds(),
                options.sync
            );
            match self
                .engine
                .run(&self.settings.migrate_group, &dir.path, options)
                .await
            {
                Ok(()) => {
                    info!("Imported {}", dir.name());
                    if let Err(e) = self.ledger.record(&dir.path) {
                        error!("Failed to record import of {}: {}", dir.name(), e);
                    }
                    self.archive(dir);
                    imported.push(dir.path.clone());
                }
                Err(e) => {
                    error!("Import of {} failed: {}", dir.path.display(), e);
                    failed.push(dir.path.clone());
                }
            }
        }

        ImportOutcome::Completed { imported, failed }
    }

    fn already_imported(&self, dir: &SnapshotDirectory) -> bool {
        self.ledger.contains(&dir.path).unwrap_or_else(|e| {
            error!("Failed to read import ledger for {}: {}", dir.name(), e);
            false
        })
    }

    /// Move an imported snapshot to the backup directory and clear its ledger entry.
    fn archive(&self, dir: &SnapshotDirectory) {
        match archive_snapshot(dir, &self.settings.backup_directory) {
            Ok(_) => {
                if let Err(e) = self.ledger.forget(&dir.path) {
                    warn!("Failed to clear import ledger for {}: {}", dir.name(), e);
                }
            }
            Err(e) => warn!("Imported {} but could not archive it: {}", dir.name(), e),
        }
    }

    /// Roll back the migration group. Errors are logged, never returned.
    pub async fn rollback(&self) {
        info!("Rolling back Traction Rec migrations...");
        match self.engine.rollback(&self.settings.migrate_group).await {
            Ok(()) => info!("Rollback done!"),
            Err(e) => error!("{}", e),
        }
    }

    /// Operator escape hatch for a lock left behind by a crashed run.
    pub fn reset_lock(&self) -> Result<()> {
        info!("Reset import status...");
        self.lock.release()
    }

    /// Delete every session node. Returns the number deleted.
    pub fn flush_sessions(&self) -> Result<usize> {
        let sessions = self
            .content
            .load_nodes_by_type(ImportConfig::SESSION_BUNDLE)?;
        if sessions.is_empty() {
            debug!("No sessions to flush");
            return Ok(0);
        }

        let deleted = self.content.delete_nodes(&sessions)?;
        info!("Flushed {} sessions", deleted);
        Ok(deleted)
    }

    pub fn queue_cleanup(&self) -> Result<i64> {
        self.queue.enqueue(&QueueItem::Cleanup)
    }

    pub fn queue_sync_import(&self, directory: impl Into<PathBuf>) -> Result<i64> {
        self.queue.enqueue(&QueueItem::Sync {
            directory: directory.into(),
        })
    }
}
