//! Backup retention sweep.
//!
//! Keeps the `keep_limit` most recently modified entries of the backup
//! directory and deletes everything older. A failed deletion ends the sweep
//! for this run; the next scheduled run picks up where it stopped.

use crate::config::Settings;
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Where the current process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Cron job, CLI or queue worker.
    Batch,
    /// Serving a request; destructive sweeps are not allowed here.
    Interactive,
}

/// Result of one retention sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    /// Backups disabled or not in a batch context.
    Skipped,
    Completed {
        kept: usize,
        removed: Vec<PathBuf>,
    },
    /// Deletion failed; entries removed before the failure stay removed.
    Failed {
        removed: Vec<PathBuf>,
        failed: PathBuf,
        error: String,
    },
}

impl PruneOutcome {
    pub fn removed(&self) -> &[PathBuf] {
        match self {
            PruneOutcome::Skipped => &[],
            PruneOutcome::Completed { removed, .. } | PruneOutcome::Failed { removed, .. } => {
                removed
            }
        }
    }
}

/// Bounds the number of retained snapshot backups.
pub struct RetentionManager {
    backup_dir: PathBuf,
    backup_enabled: bool,
    context: ExecutionContext,
}

impl RetentionManager {
    pub fn new(settings: &Settings, context: ExecutionContext) -> Self {
        Self {
            backup_dir: settings.backup_directory.clone(),
            backup_enabled: settings.backup_enabled,
            context,
        }
    }

    /// Delete all but the `keep_limit` most recent backups.
    pub fn prune_backups(&self, keep_limit: usize) -> PruneOutcome {
        if self.context != ExecutionContext::Batch {
            debug!("Backup pruning skipped outside of a batch context");
            return PruneOutcome::Skipped;
        }
        if !self.backup_enabled {
            debug!("Backups are disabled, nothing to prune");
            return PruneOutcome::Skipped;
        }

        let entries = match list_by_recency(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Impossible to list JSON backups in {}: {}",
                    self.backup_dir.display(),
                    e
                );
                return PruneOutcome::Failed {
                    removed: Vec::new(),
                    failed: self.backup_dir.clone(),
                    error: e.to_string(),
                };
            }
        };

        let kept = entries.len().min(keep_limit);
        let mut removed = Vec::new();
        for path in entries.into_iter().skip(keep_limit) {
            if let Err(e) = remove_entry(&path) {
                warn!("Impossible to remove JSON files: {}: {}", path.display(), e);
                return PruneOutcome::Failed {
                    removed,
                    failed: path,
                    error: e.to_string(),
                };
            }
            debug!("Removed backup {}", path.display());
            removed.push(path);
        }

        if !removed.is_empty() {
            info!(
                "Removed {} old backups from {}, kept {}",
                removed.len(),
                self.backup_dir.display(),
                kept
            );
        }
        PruneOutcome::Completed { kept, removed }
    }
}

/// Entries of `dir`, most recently modified first.
fn list_by_recency(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let modified = entry.metadata()?.modified()?;
        entries.push((modified, entry.path()));
    }

    entries.sort_by(|a, b| match b.0.cmp(&a.0) {
        Ordering::Equal => b.1.cmp(&a.1),
        other => other,
    });
    Ok(entries.into_iter().map(|(_, path)| path).collect())
}

fn remove_entry(path: &Path) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
