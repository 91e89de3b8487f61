//! Queue worker for deferred clean-up and sync imports.

use crate::config::ImportConfig;
use crate::migration::ImportOptions;
use crate::orchestrator::{ImportOrchestrator, ImportOutcome};
use crate::queue::{ClaimedItem, QueueItem, TaskQueue};
use crate::retention::{PruneOutcome, RetentionManager};
use crate::{ImportError, Result};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Counters for one [`QueueWorker::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Items handled and deleted.
    pub processed: usize,
    /// Items given back for redelivery.
    pub released: usize,
    /// Undecodable items dropped from the queue.
    pub invalid: usize,
}

/// What to do with a claimed item after its handler ran.
enum Disposition {
    Done,
    Retry,
}

pub struct QueueWorker {
    orchestrator: Arc<ImportOrchestrator>,
    queue: Arc<dyn TaskQueue>,
    retention: RetentionManager,
}

impl QueueWorker {
    pub fn new(
        orchestrator: Arc<ImportOrchestrator>,
        queue: Arc<dyn TaskQueue>,
        retention: RetentionManager,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            retention,
        }
    }

    /// Drain the queue, handling at most `max_items` items when given.
    ///
    /// Items that need another attempt keep their lease until the run ends so
    /// this run does not claim them twice; they are released afterwards.
    pub async fn run(&self, max_items: Option<usize>) -> Result<WorkerSummary> {
        let mut summary = WorkerSummary::default();
        let mut retry = Vec::new();

        loop {
            if max_items.is_some_and(|max| summary.processed + retry.len() >= max) {
                break;
            }

            let claimed = match self.queue.claim(ImportConfig::QUEUE_LEASE) {
                Ok(Some(claimed)) => claimed,
                Ok(None) => break,
                Err(ImportError::InvalidQueueItem { item_id, message }) => {
                    warn!("Dropped queue item {}: {}", item_id, message);
                    summary.invalid += 1;
                    continue;
                }
                Err(e) => {
                    self.release_all(&retry);
                    return Err(e);
                }
            };

            match self.handle(&claimed).await {
                Disposition::Done => {
                    self.queue.delete(claimed.item_id)?;
                    summary.processed += 1;
                }
                Disposition::Retry => retry.push(claimed.item_id),
            }
        }

        summary.released = self.release_all(&retry);
        info!(
            "Queue run finished: {} processed, {} released, {} invalid",
            summary.processed, summary.released, summary.invalid
        );
        Ok(summary)
    }

    async fn handle(&self, claimed: &ClaimedItem) -> Disposition {
        debug!("Handling queue item {}: {:?}", claimed.item_id, claimed.item);
        match &claimed.item {
            QueueItem::Cleanup => {
                let keep = self.orchestrator.settings().backup_limit;
                match self.retention.prune_backups(keep) {
                    PruneOutcome::Failed { .. } => Disposition::Retry,
                    PruneOutcome::Skipped | PruneOutcome::Completed { .. } => Disposition::Done,
                }
            }
            QueueItem::Sync { directory } => {
                let options = ImportOptions { sync: true };
                match self.orchestrator.import_directory(directory, options).await {
                    Ok(ImportOutcome::AlreadyRunning | ImportOutcome::MigrationsUnhealthy) => {
                        info!(
                            "Sync import of {} deferred, pipeline is busy",
                            directory.display()
                        );
                        Disposition::Retry
                    }
                    Ok(_) => Disposition::Done,
                    Err(e) => {
                        error!("Sync import of {} failed: {}", directory.display(), e);
                        Disposition::Retry
                    }
                }
            }
        }
    }

    fn release_all(&self, item_ids: &[i64]) -> usize {
        item_ids
            .iter()
            .filter(|item_id| match self.queue.release(**item_id) {
                Ok(()) => true,
                Err(e) => {
                    error!("Failed to release queue item {}: {}", item_id, e);
                    false
                }
            })
            .count()
    }
}
