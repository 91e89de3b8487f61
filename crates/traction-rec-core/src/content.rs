//! Content store seam: the entity tables the imported data ends up in.
//!
//! Only the operations the import core needs are exposed: loading nodes by
//! bundle, finding paragraphs without a parent, and bulk deletes.

use crate::state::configure_connection;
use crate::{ImportError, Result};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// A content node row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub nid: i64,
    pub bundle: String,
    pub title: String,
}

/// A paragraph (content fragment) row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParagraphRecord {
    pub id: i64,
    pub bundle: String,
    pub parent_id: Option<String>,
    pub parent_type: Option<String>,
}

impl ParagraphRecord {
    pub fn is_orphaned(&self) -> bool {
        self.parent_id.is_none() && self.parent_type.is_none()
    }
}

/// Keyed entity storage used by the flush and orphan sweeps.
pub trait ContentStore: Send + Sync {
    /// All nodes of the given bundle.
    fn load_nodes_by_type(&self, bundle: &str) -> Result<Vec<NodeRecord>>;

    /// Delete the given nodes, returning how many rows went away.
    fn delete_nodes(&self, nodes: &[NodeRecord]) -> Result<usize>;

    /// Up to `limit` ids of paragraphs whose parent id and parent type are both null,
    /// in ascending id order.
    fn orphaned_paragraph_ids(&self, limit: usize) -> Result<Vec<i64>>;

    fn load_paragraphs(&self, ids: &[i64]) -> Result<Vec<ParagraphRecord>>;

    fn delete_paragraphs(&self, paragraphs: &[ParagraphRecord]) -> Result<usize>;
}

/// [`ContentStore`] over the `node_field_data` and
/// `paragraphs_item_field_data` tables of a SQLite database.
#[derive(Clone)]
pub struct SqliteContentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContentStore {
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ImportError::io_with_path(e, parent))?;
            }
        }

        let conn = Connection::open(db_path)?;
        configure_connection(&conn)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS node_field_data (
                nid INTEGER PRIMARY KEY,
                type TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS node_field_data_type ON node_field_data (type);

            CREATE TABLE IF NOT EXISTS paragraphs_item_field_data (
                id INTEGER PRIMARY KEY,
                type TEXT NOT NULL,
                parent_id TEXT,
                parent_type TEXT
            );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ImportError::Database {
            message: "Failed to acquire content connection lock".to_string(),
            source: None,
        })
    }

    /// Insert a node; returns its id.
    pub fn insert_node(&self, bundle: &str, title: &str) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO node_field_data (type, title) VALUES (?1, ?2)",
            params![bundle, title],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert a paragraph; returns its id.
    pub fn insert_paragraph(
        &self,
        bundle: &str,
        parent_id: Option<&str>,
        parent_type: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO paragraphs_item_field_data (type, parent_id, parent_type) VALUES (?1, ?2, ?3)",
            params![bundle, parent_id, parent_type],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn count_paragraphs(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM paragraphs_item_field_data", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl ContentStore for SqliteContentStore {
    fn load_nodes_by_type(&self, bundle: &str) -> Result<Vec<NodeRecord>> {
        let conn = self.lock_conn()?;
        let mut stmt =
            conn.prepare("SELECT nid, type, title FROM node_field_data WHERE type = ?1 ORDER BY nid")?;
        let rows = stmt.query_map(params![bundle], |row| {
            Ok(NodeRecord {
                nid: row.get(0)?,
                bundle: row.get(1)?,
                title: row.get(2)?,
            })
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }

    fn delete_nodes(&self, nodes: &[NodeRecord]) -> Result<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            &format!(
                "DELETE FROM node_field_data WHERE nid IN ({})",
                placeholders(nodes.len())
            ),
            params_from_iter(nodes.iter().map(|n| n.nid)),
        )?;
        tx.commit()?;
        debug!("Deleted {} nodes", deleted);
        Ok(deleted)
    }

    fn orphaned_paragraph_ids(&self, limit: usize) -> Result<Vec<i64>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM paragraphs_item_field_data
             WHERE parent_id IS NULL AND parent_type IS NULL
             ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn load_paragraphs(&self, ids: &[i64]) -> Result<Vec<ParagraphRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id, type, parent_id, parent_type FROM paragraphs_item_field_data
             WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok(ParagraphRecord {
                id: row.get(0)?,
                bundle: row.get(1)?,
                parent_id: row.get(2)?,
                parent_type: row.get(3)?,
            })
        })?;

        let mut paragraphs = Vec::new();
        for row in rows {
            paragraphs.push(row?);
        }
        Ok(paragraphs)
    }

    fn delete_paragraphs(&self, paragraphs: &[ParagraphRecord]) -> Result<usize> {
        if paragraphs.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            &format!(
                "DELETE FROM paragraphs_item_field_data WHERE id IN ({})",
                placeholders(paragraphs.len())
            ),
            params_from_iter(paragraphs.iter().map(|p| p.id)),
        )?;
        tx.commit()?;
        Ok(deleted)
    }
}
