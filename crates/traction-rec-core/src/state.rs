//! SQLite-backed state database shared by every import process.
//!
//! Holds the import lock row, the task queue and the import ledger. The
//! database runs in WAL mode with a busy timeout so that independently
//! scheduled processes see one another's writes and serialize on them instead
//! of failing.

use crate::config::StateDbConfig;
use crate::{ImportError, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Handle to the state database.
///
/// Cloning is cheap and shares the underlying connection.
#[derive(Clone)]
pub struct StateDb {
    conn: Arc<Mutex<Connection>>,
}

impl StateDb {
    /// Open the state database at `db_path`.
    ///
    /// Creates the database and parent directories if they don't exist.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| ImportError::Io {
                    message: format!("Failed to create state directory: {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        configure_connection(&conn)?;
        ensure_schema(&conn)?;
        debug!("Opened state database at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ImportError::Database {
            message: "Failed to acquire state connection lock".to_string(),
            source: None,
        })
    }
}

/// Apply the pragmas every connection to a cross-process database needs.
pub(crate) fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA busy_timeout={};\n\
         PRAGMA journal_mode=WAL;\n\
         PRAGMA synchronous=NORMAL;",
        StateDbConfig::BUSY_TIMEOUT_MS,
    ))?;
    Ok(())
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS import_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS queue (
            item_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            data TEXT NOT NULL,
            created INTEGER NOT NULL,
            expire INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS queue_name_created ON queue (name, created, item_id);

        CREATE TABLE IF NOT EXISTS imported_snapshot (
            path TEXT PRIMARY KEY,
            imported_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}
