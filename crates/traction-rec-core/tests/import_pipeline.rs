//! Integration tests for the import pipeline.
//!
//! The migration engine is replaced by a scripted in-memory engine; the lock,
//! queue and content databases are real SQLite files in a temp directory.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use traction_rec_import::{
    ContentStore, ImportError, ImportLock, ImportOptions, ImportOutcome, MigrationEngine,
    MigrationTask, MigrationTaskStatus, PruneOutcome, QueueItem, ReconcileOutcome, Result,
    Settings, SqliteContentStore, StateDb, TractionRecImport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunCall {
    directory: PathBuf,
    sync: bool,
    lock_held: bool,
}

#[derive(Default)]
struct ScriptedEngine {
    statuses: Vec<MigrationTaskStatus>,
    failing: HashSet<String>,
    rollback_fails: bool,
    lock_watch: Mutex<Option<ImportLock>>,
    runs: Mutex<Vec<RunCall>>,
    rollbacks: Mutex<usize>,
}

impl ScriptedEngine {
    fn healthy() -> Self {
        Self::default()
    }

    fn with_statuses(statuses: &[MigrationTaskStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    fn failing_on(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    fn runs(&self) -> Vec<RunCall> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl MigrationEngine for ScriptedEngine {
    async fn status(&self, _group: &str) -> Result<Vec<MigrationTask>> {
        Ok(self
            .statuses
            .iter()
            .enumerate()
            .map(|(i, status)| MigrationTask {
                id: format!("tr_task_{i}"),
                status: *status,
            })
            .collect())
    }

    async fn run(&self, _group: &str, directory: &Path, options: ImportOptions) -> Result<()> {
        let lock_held = match self.lock_watch.lock().unwrap().as_ref() {
            Some(lock) => lock.is_held().unwrap(),
            None => false,
        };
        self.runs.lock().unwrap().push(RunCall {
            directory: directory.to_path_buf(),
            sync: options.sync,
            lock_held,
        });

        let name = directory.file_name().unwrap().to_string_lossy().to_string();
        if self.failing.contains(&name) {
            return Err(ImportError::MigrationFailed {
                command: format!("migrate:import {name}"),
                message: "source file is malformed".into(),
            });
        }
        Ok(())
    }

    async fn rollback(&self, _group: &str) -> Result<()> {
        *self.rollbacks.lock().unwrap() += 1;
        if self.rollback_fails {
            return Err(ImportError::Other("rollback exploded".into()));
        }
        Ok(())
    }
}

struct TestEnv {
    temp_dir: TempDir,
    settings: Settings,
}

impl TestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path();
        let settings = Settings {
            import_enabled: true,
            json_directory: root.join("json"),
            backup_directory: root.join("backup"),
            state_db_path: root.join("state.db"),
            content_db_path: root.join("content.db"),
            ..Settings::default()
        };
        std::fs::create_dir_all(&settings.json_directory).unwrap();
        Self { temp_dir, settings }
    }

    fn snapshot(&self, name: &str) -> PathBuf {
        let dir = self.settings.json_directory.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("programs.json"), "[]").unwrap();
        dir
    }

    fn open(&self, engine: Arc<ScriptedEngine>) -> TractionRecImport {
        let import = TractionRecImport::builder(self.settings.clone())
            .migration_engine(engine.clone())
            .build()
            .unwrap();
        *engine.lock_watch.lock().unwrap() = Some(import.orchestrator().lock().clone());
        import
    }

    /// A lock handle belonging to another process.
    fn foreign_lock(&self) -> ImportLock {
        ImportLock::new(StateDb::open_at(&self.settings.state_db_path).unwrap())
    }
}

#[tokio::test]
async fn test_disabled_import_takes_no_lock() {
    let mut env = TestEnv::new();
    env.settings.import_enabled = false;
    let dir = env.snapshot("20240101_000000");
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());

    let outcome = import.run_import(ImportOptions::default()).await.unwrap();

    assert_eq!(outcome, ImportOutcome::Disabled);
    assert!(!outcome.pipeline_invoked());
    assert!(engine.runs().is_empty());
    assert!(import.lock_status().unwrap().is_none());
    assert!(dir.is_dir());
}

#[tokio::test]
async fn test_held_lock_is_left_alone() {
    let env = TestEnv::new();
    env.snapshot("20240101_000000");
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());

    let other = env.foreign_lock();
    assert!(other.acquire().unwrap());

    let outcome = import.run_import(ImportOptions::default()).await.unwrap();

    assert_eq!(outcome, ImportOutcome::AlreadyRunning);
    assert!(engine.runs().is_empty());
    let holder = import.lock_status().unwrap().unwrap();
    assert_eq!(holder.holder, other.identity());
}

#[tokio::test]
async fn test_unhealthy_migrations_release_lock() {
    use MigrationTaskStatus::*;
    let env = TestEnv::new();
    let dir = env.snapshot("20240101_000000");
    let engine = Arc::new(ScriptedEngine::with_statuses(&[Idle, Stuck]));
    let import = env.open(engine.clone());

    let outcome = import.run_import(ImportOptions::default()).await.unwrap();

    assert_eq!(outcome, ImportOutcome::MigrationsUnhealthy);
    assert!(engine.runs().is_empty());
    assert!(import.lock_status().unwrap().is_none());
    assert!(dir.is_dir());
}

#[tokio::test]
async fn test_nothing_to_import_releases_lock() {
    let env = TestEnv::new();
    std::fs::create_dir_all(env.settings.json_directory.join("not-a-snapshot")).unwrap();
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());

    let outcome = import.run_import(ImportOptions::default()).await.unwrap();

    assert_eq!(outcome, ImportOutcome::NothingToImport);
    assert!(engine.runs().is_empty());
    assert!(import.lock_status().unwrap().is_none());
}

#[tokio::test]
async fn test_failed_directory_does_not_stop_the_run() {
    let env = TestEnv::new();
    let first = env.snapshot("20240101_000000");
    let second = env.snapshot("20240102_000000");
    let engine = Arc::new(ScriptedEngine::failing_on(&["20240101_000000"]));
    let import = env.open(engine.clone());

    let outcome = import.run_import(ImportOptions::default()).await.unwrap();

    assert_eq!(
        outcome,
        ImportOutcome::Completed {
            imported: vec![second.clone()],
            failed: vec![first.clone()],
        }
    );
    assert!(outcome.pipeline_invoked());

    let runs = engine.runs();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].directory, first);
    assert_eq!(runs[1].directory, second);
    assert!(runs.iter().all(|run| run.lock_held && !run.sync));

    assert!(import.lock_status().unwrap().is_none());

    // Failed snapshot stays for the next run, imported one is archived.
    assert!(first.is_dir());
    assert!(!second.exists());
    assert!(env
        .settings
        .backup_directory
        .join("20240102_000000")
        .join("programs.json")
        .is_file());
}

#[tokio::test]
async fn test_sync_option_reaches_engine() {
    let env = TestEnv::new();
    env.snapshot("20240101_000000");
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());

    import
        .run_import(ImportOptions { sync: true })
        .await
        .unwrap();

    assert!(engine.runs()[0].sync);
}

#[tokio::test]
async fn test_second_run_sees_archived_snapshots_gone() {
    let env = TestEnv::new();
    env.snapshot("20240101_000000");
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());

    import.run_import(ImportOptions::default()).await.unwrap();
    let outcome = import.run_import(ImportOptions::default()).await.unwrap();

    assert_eq!(outcome, ImportOutcome::NothingToImport);
    assert_eq!(engine.runs().len(), 1);
}

#[tokio::test]
async fn test_rollback_swallows_engine_errors() {
    let env = TestEnv::new();
    let engine = Arc::new(ScriptedEngine {
        rollback_fails: true,
        ..ScriptedEngine::default()
    });
    let import = env.open(engine.clone());

    import.rollback().await;

    assert_eq!(*engine.rollbacks.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_reset_lock_clears_foreign_holder() {
    let env = TestEnv::new();
    let import = env.open(Arc::new(ScriptedEngine::healthy()));
    assert!(env.foreign_lock().acquire().unwrap());

    import.reset_lock().unwrap();

    assert!(import.lock_status().unwrap().is_none());
    // Idempotent.
    import.reset_lock().unwrap();
}

#[tokio::test]
async fn test_flush_sessions_only_removes_sessions() {
    let env = TestEnv::new();
    let store = SqliteContentStore::open_at(&env.settings.content_db_path).unwrap();
    for i in 0..3 {
        store.insert_node("session", &format!("Session {i}")).unwrap();
    }
    store.insert_node("program", "Swim").unwrap();

    let import = TractionRecImport::builder(env.settings.clone())
        .migration_engine(Arc::new(ScriptedEngine::healthy()))
        .content_store(Arc::new(store.clone()))
        .build()
        .unwrap();

    assert_eq!(import.flush_sessions().unwrap(), 3);
    assert_eq!(import.flush_sessions().unwrap(), 0);
    assert_eq!(store.load_nodes_by_type("program").unwrap().len(), 1);
}

#[tokio::test]
async fn test_db_clean_up_removes_orphans_only() {
    let env = TestEnv::new();
    let store = SqliteContentStore::open_at(&env.settings.content_db_path).unwrap();
    for _ in 0..60 {
        store.insert_paragraph("schedule", None, None).unwrap();
    }
    store
        .insert_paragraph("schedule", Some("1"), Some("node"))
        .unwrap();

    let import = TractionRecImport::builder(env.settings.clone())
        .migration_engine(Arc::new(ScriptedEngine::healthy()))
        .content_store(Arc::new(store.clone()))
        .build()
        .unwrap();

    assert_eq!(
        import.db_clean_up(5000),
        ReconcileOutcome::Completed {
            deleted: 60,
            batches: 2
        }
    );
    assert_eq!(import.db_clean_up(5000), ReconcileOutcome::NothingToDo);
    assert_eq!(store.count_paragraphs().unwrap(), 1);
}

#[tokio::test]
async fn test_clean_up_keeps_backup_limit() {
    let mut env = TestEnv::new();
    env.settings.backup_limit = 15;
    std::fs::create_dir_all(&env.settings.backup_directory).unwrap();
    for i in 0..17 {
        std::fs::write(
            env.settings.backup_directory.join(format!("backup_{i:02}.json")),
            "[]",
        )
        .unwrap();
    }
    let import = env.open(Arc::new(ScriptedEngine::healthy()));

    let outcome = import.clean_up();

    assert_eq!(outcome.removed().len(), 2);
    assert!(matches!(outcome, PruneOutcome::Completed { kept: 15, .. }));
    let remaining = std::fs::read_dir(&env.settings.backup_directory)
        .unwrap()
        .count();
    assert_eq!(remaining, 15);
}

#[tokio::test]
async fn test_fetch_all_disabled_is_noop() {
    let env = TestEnv::new();
    let import = env.open(Arc::new(ScriptedEngine::healthy()));

    assert_eq!(import.fetch_all().await.unwrap(), None);
    assert_eq!(import.queue_import_sync().await.unwrap(), None);
    assert!(import.queue().is_empty().unwrap());
}

#[tokio::test]
async fn test_queue_worker_processes_cleanup_and_sync() {
    let env = TestEnv::new();
    let dir = env.snapshot("20240101_000000");
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());

    import.queue_cleanup().unwrap();
    import.orchestrator().queue_sync_import(&dir).unwrap();

    let summary = import.run_queue(None).await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.released, 0);
    assert!(import.queue().is_empty().unwrap());

    let runs = engine.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].directory, dir);
    assert!(runs[0].sync);
    assert!(import.lock_status().unwrap().is_none());
}

#[tokio::test]
async fn test_queue_worker_defers_sync_while_locked() {
    let env = TestEnv::new();
    let dir = env.snapshot("20240101_000000");
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());
    import.orchestrator().queue_sync_import(&dir).unwrap();

    let other = env.foreign_lock();
    assert!(other.acquire().unwrap());

    let summary = import.run_queue(None).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.released, 1);
    assert_eq!(import.queue().len().unwrap(), 1);
    assert!(engine.runs().is_empty());

    // Redelivered once the lock is free.
    other.release().unwrap();
    let summary = import.run_queue(None).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(engine.runs().len(), 1);
}

#[tokio::test]
async fn test_queue_worker_honors_max_items() {
    let env = TestEnv::new();
    let import = env.open(Arc::new(ScriptedEngine::healthy()));
    for _ in 0..3 {
        import.queue().enqueue(&QueueItem::Cleanup).unwrap();
    }

    let summary = import.run_queue(Some(2)).await.unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(import.queue().len().unwrap(), 1);
}

#[tokio::test]
async fn test_sync_item_for_missing_directory_is_dropped() {
    let env = TestEnv::new();
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());
    import
        .orchestrator()
        .queue_sync_import(env.temp_dir.path().join("json").join("20240101_000000"))
        .unwrap();

    let summary = import.run_queue(None).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert!(engine.runs().is_empty());
    assert!(import.queue().is_empty().unwrap());
}

#[tokio::test]
async fn test_imported_snapshot_is_not_rerun_when_archive_fails() {
    let env = TestEnv::new();
    let dir = env.snapshot("20240101_000000");
    std::fs::write(&env.settings.backup_directory, "not a directory").unwrap();
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());

    for _ in 0..3 {
        import.run_import(ImportOptions::default()).await.unwrap();
    }

    assert_eq!(engine.runs().len(), 1);
    assert!(dir.is_dir());
    assert!(import.lock_status().unwrap().is_none());

    // Once the backup directory is usable the pending archive goes through.
    std::fs::remove_file(&env.settings.backup_directory).unwrap();
    import.run_import(ImportOptions::default()).await.unwrap();

    assert_eq!(engine.runs().len(), 1);
    assert!(!dir.exists());
    assert!(env
        .settings
        .backup_directory
        .join("20240101_000000")
        .join("programs.json")
        .is_file());
}

#[tokio::test]
async fn test_sync_item_for_foreign_directory_is_dropped() {
    let env = TestEnv::new();
    let foreign = env.temp_dir.path().join("not-a-snapshot");
    std::fs::create_dir_all(&foreign).unwrap();
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());
    import.orchestrator().queue_sync_import(&foreign).unwrap();

    let summary = import.run_queue(None).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.released, 0);
    assert!(import.queue().is_empty().unwrap());
    assert!(engine.runs().is_empty());
    assert!(import.lock_status().unwrap().is_none());
    assert!(foreign.is_dir());
}

#[tokio::test]
async fn test_listing_error_releases_lock() {
    let env = TestEnv::new();
    std::fs::remove_dir_all(&env.settings.json_directory).unwrap();
    std::fs::write(&env.settings.json_directory, "not a directory").unwrap();
    let engine = Arc::new(ScriptedEngine::healthy());
    let import = env.open(engine.clone());

    let result = import.run_import(ImportOptions::default()).await;

    assert!(matches!(result, Err(ImportError::NotADirectory(_))));
    assert!(engine.runs().is_empty());
    assert!(import.lock_status().unwrap().is_none());
}
