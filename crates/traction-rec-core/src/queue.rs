//! Durable task queue for deferred clean-up and sync imports.
//!
//! Items are claimed with a lease. A worker that dies mid-item leaves the
//! lease to expire, after which the item is claimable again, so delivery is
//! at least once.

use crate::state::StateDb;
use crate::{ImportError, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Work item payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueItem {
    Cleanup,
    #[serde(alias = "traction_rec_sync")]
    Sync { directory: PathBuf },
}

/// An item claimed by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedItem {
    pub item_id: i64,
    pub item: QueueItem,
    /// Unix timestamp at which the lease runs out.
    pub expire: i64,
}

pub trait TaskQueue: Send + Sync {
    /// Append an item; returns its id.
    fn enqueue(&self, item: &QueueItem) -> Result<i64>;

    /// Claim the oldest available item for `lease`.
    ///
    /// An item whose payload cannot be decoded is removed and reported as
    /// [`ImportError::InvalidQueueItem`].
    fn claim(&self, lease: Duration) -> Result<Option<ClaimedItem>>;

    /// Remove a processed item.
    fn delete(&self, item_id: i64) -> Result<()>;

    /// Give a claimed item back for redelivery.
    fn release(&self, item_id: i64) -> Result<()>;

    /// Number of items, claimed or not.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// [`TaskQueue`] stored in the `queue` table of the state database.
#[derive(Clone)]
pub struct SqliteTaskQueue {
    db: StateDb,
    name: String,
}

impl SqliteTaskQueue {
    pub fn new(db: StateDb, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }
}

impl TaskQueue for SqliteTaskQueue {
    fn enqueue(&self, item: &QueueItem) -> Result<i64> {
        let data = serde_json::to_string(item)?;
        let conn = self.db.lock_conn()?;
        conn.execute(
            "INSERT INTO queue (name, data, created) VALUES (?1, ?2, ?3)",
            params![self.name, data, Utc::now().timestamp()],
        )?;
        let item_id = conn.last_insert_rowid();
        debug!("Queued item {} on {}: {}", item_id, self.name, data);
        Ok(item_id)
    }

    fn claim(&self, lease: Duration) -> Result<Option<ClaimedItem>> {
        let conn = self.db.lock_conn()?;
        let now = Utc::now().timestamp();
        let expire = now + lease.as_secs() as i64;

        // Another process may claim the same candidate between the SELECT and
        // the UPDATE; the `expire` predicate makes the loser retry.
        loop {
            let candidate: Option<(i64, String, i64)> = conn
                .query_row(
                    "SELECT item_id, data, expire FROM queue
                     WHERE name = ?1 AND (expire = 0 OR expire < ?2)
                     ORDER BY created, item_id LIMIT 1",
                    params![self.name, now],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let Some((item_id, data, previous_expire)) = candidate else {
                return Ok(None);
            };

            let claimed = conn.execute(
                "UPDATE queue SET expire = ?1 WHERE item_id = ?2 AND expire = ?3",
                params![expire, item_id, previous_expire],
            )?;
            if claimed == 0 {
                continue;
            }

            let item = match serde_json::from_str(&data) {
                Ok(item) => item,
                Err(e) => {
                    // Undecodable payloads would fail on every redelivery.
                    conn.execute("DELETE FROM queue WHERE item_id = ?1", params![item_id])?;
                    return Err(ImportError::InvalidQueueItem {
                        item_id,
                        message: e.to_string(),
                    });
                }
            };
            return Ok(Some(ClaimedItem {
                item_id,
                item,
                expire,
            }));
        }
    }

    fn delete(&self, item_id: i64) -> Result<()> {
        let conn = self.db.lock_conn()?;
        conn.execute("DELETE FROM queue WHERE item_id = ?1", params![item_id])?;
        Ok(())
    }

    fn release(&self, item_id: i64) -> Result<()> {
        let conn = self.db.lock_conn()?;
        conn.execute(
            "UPDATE queue SET expire = 0 WHERE item_id = ?1",
            params![item_id],
        )?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let conn = self.db.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE name = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
