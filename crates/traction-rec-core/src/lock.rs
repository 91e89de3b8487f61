//! Cross-process import lock.
//!
//! The lock is a single row in the `import_lock` table of the state database.
//! Claiming it is an `INSERT OR IGNORE` on a fixed primary key, which SQLite
//! executes atomically under its write lock, so two scheduled runs racing for
//! it from different processes cannot both win. There is no expiry: a lock
//! left behind by a crashed run stays held until an operator resets it.

use crate::state::StateDb;
use crate::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Current owner of the import lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    /// `<pid>:<uuid>` of the acquiring run.
    pub holder: String,
    /// RFC 3339 acquisition time.
    pub acquired_at: String,
}

/// Exclusive token guarding the import pipeline.
#[derive(Clone)]
pub struct ImportLock {
    db: StateDb,
    identity: String,
}

impl ImportLock {
    pub fn new(db: StateDb) -> Self {
        let identity = format!("{}:{}", std::process::id(), uuid::Uuid::new_v4());
        Self { db, identity }
    }

    /// Identity recorded when this handle acquires the lock.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Try to claim the lock without waiting.
    ///
    /// Returns `true` iff the lock was free and is now held by this handle.
    pub fn acquire(&self) -> Result<bool> {
        let conn = self.db.lock_conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO import_lock (id, holder, acquired_at) VALUES (1, ?1, ?2)",
            params![self.identity, Utc::now().to_rfc3339()],
        )?;

        if inserted == 1 {
            debug!("Import lock acquired by {}", self.identity);
        }
        Ok(inserted == 1)
    }

    /// Clear the lock regardless of who holds it. Releasing a free lock is a no-op.
    pub fn release(&self) -> Result<()> {
        let conn = self.db.lock_conn()?;
        let removed = conn.execute("DELETE FROM import_lock WHERE id = 1", [])?;
        if removed > 0 {
            debug!("Import lock released by {}", self.identity);
        }
        Ok(())
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Result<Option<LockHolder>> {
        let conn = self.db.lock_conn()?;
        let holder = conn
            .query_row(
                "SELECT holder, acquired_at FROM import_lock WHERE id = 1",
                [],
                |row| {
                    Ok(LockHolder {
                        holder: row.get(0)?,
                        acquired_at: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(holder)
    }

    pub fn is_held(&self) -> Result<bool> {
        Ok(self.holder()?.is_some())
    }

    /// Claim the lock as a scoped resource.
    ///
    /// Returns `None` when another run holds it. The returned guard releases
    /// the lock when dropped.
    pub fn try_guard(&self) -> Result<Option<ImportLockGuard<'_>>> {
        if self.acquire()? {
            Ok(Some(ImportLockGuard {
                lock: self,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }
}

/// Holds the import lock until released or dropped.
pub struct ImportLockGuard<'a> {
    lock: &'a ImportLock,
    released: bool,
}

impl ImportLockGuard<'_> {
    /// Release the lock, reporting failure to the caller.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.lock.release()
    }
}

impl Drop for ImportLockGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        info!("Releasing import lock on early exit");
        if let Err(e) = self.lock.release() {
            error!("Failed to release import lock: {}", e);
        }
    }
}
