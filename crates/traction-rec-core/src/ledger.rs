//! Record of snapshots whose migration run succeeded but that are still
//! waiting to be archived.
//!
//! An entry is written as soon as a run succeeds and removed once the snapshot
//! has left the JSON directory, so a snapshot that cannot be archived is not
//! imported a second time by the next scheduled run.

use crate::state::StateDb;
use crate::Result;
use chrono::Utc;
use rusqlite::params;
use std::path::Path;
use tracing::debug;

#[derive(Clone)]
pub struct ImportLedger {
    db: StateDb,
}

impl ImportLedger {
    pub fn new(db: StateDb) -> Self {
        Self { db }
    }

    /// Mark the snapshot at `path` as imported.
    pub fn record(&self, path: &Path) -> Result<()> {
        let conn = self.db.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO imported_snapshot (path, imported_at) VALUES (?1, ?2)",
            params![path.to_string_lossy(), Utc::now().to_rfc3339()],
        )?;
        debug!("Recorded import of {}", path.display());
        Ok(())
    }

    pub fn contains(&self, path: &Path) -> Result<bool> {
        let conn = self.db.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM imported_snapshot WHERE path = ?1",
            params![path.to_string_lossy()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Drop the entry for `path`. Forgetting an unknown path is a no-op.
    pub fn forget(&self, path: &Path) -> Result<()> {
        let conn = self.db.lock_conn()?;
        conn.execute(
            "DELETE FROM imported_snapshot WHERE path = ?1",
            params![path.to_string_lossy()],
        )?;
        Ok(())
    }
}
