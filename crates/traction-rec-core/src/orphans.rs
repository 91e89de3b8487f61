//! Orphaned paragraph clean-up.
//!
//! Session time paragraphs lose their parent when an import is interrupted
//! or superseded. The sweep deletes them in fixed-size batches; batches
//! deleted before a failure stay deleted.

use crate::config::ImportConfig;
use crate::content::ContentStore;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    NothingToDo,
    Completed {
        deleted: usize,
        batches: usize,
    },
    /// Storage failed mid-pass.
    Aborted {
        deleted: usize,
        batches: usize,
        error: String,
    },
}

impl ReconcileOutcome {
    pub fn deleted(&self) -> usize {
        match self {
            ReconcileOutcome::NothingToDo => 0,
            ReconcileOutcome::Completed { deleted, .. }
            | ReconcileOutcome::Aborted { deleted, .. } => *deleted,
        }
    }
}

pub struct OrphanReconciler {
    store: Arc<dyn ContentStore>,
    batch_size: usize,
}

impl OrphanReconciler {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            batch_size: ImportConfig::ORPHAN_BATCH_SIZE,
        }
    }

    /// Delete up to `limit` orphaned paragraphs.
    pub fn reconcile(&self, limit: usize) -> ReconcileOutcome {
        let ids = match self.store.orphaned_paragraph_ids(limit) {
            Ok(ids) => ids,
            Err(e) => {
                error!("TR paragraphs clean up error: {}", e);
                return ReconcileOutcome::Aborted {
                    deleted: 0,
                    batches: 0,
                    error: e.to_string(),
                };
            }
        };

        if ids.is_empty() {
            debug!("No orphaned paragraphs found");
            return ReconcileOutcome::NothingToDo;
        }

        let mut deleted = 0;
        let mut batches = 0;
        for chunk in ids.chunks(self.batch_size) {
            let result = self
                .store
                .load_paragraphs(chunk)
                .and_then(|paragraphs| self.store.delete_paragraphs(&paragraphs));

            match result {
                Ok(count) => {
                    deleted += count;
                    batches += 1;
                }
                Err(e) => {
                    error!(
                        "TR paragraphs clean up error after {} deleted: {}",
                        deleted, e
                    );
                    return ReconcileOutcome::Aborted {
                        deleted,
                        batches,
                        error: e.to_string(),
                    };
                }
            }
        }

        info!(
            "Removed {} orphaned paragraphs in {} batches",
            deleted, batches
        );
        ReconcileOutcome::Completed { deleted, batches }
    }
}
