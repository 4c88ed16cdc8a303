//! Durable offline operation queue with capped exponential backoff.

mod executor;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub use executor::{OperationExecutor, TransportExecutor};

use crate::config::EngineConfig;
use crate::error::ErrorClass;
use crate::models::{OperationId, OperationStatus, PendingOperation};
use crate::services::MetadataStore;
use crate::{util, Error, Result};

/// Counts of operations per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub retrying: usize,
    pub failed: usize,
    pub completed: usize,
}

impl QueueStats {
    /// Operations still expected to run
    pub const fn active(&self) -> usize {
        self.pending + self.retrying
    }
}

/// Result of one `process_due` drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessReport {
    pub completed: usize,
    pub retrying: usize,
    pub failed: usize,
}

/// Rows removed by `cleanup`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub operations: usize,
    pub conflicts: usize,
}

/// Delay before retry number `retry_count` (1-based): `base * 2^(n-1)`, capped.
pub fn backoff_delay(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = retry_count.saturating_sub(1);
    let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Persisted FIFO of remote work, drained by a bounded pool of workers.
#[derive(Clone)]
pub struct OperationQueue {
    store: MetadataStore,
    config: EngineConfig,
    stats: Arc<watch::Sender<QueueStats>>,
}

impl OperationQueue {
    pub fn new(store: MetadataStore, config: EngineConfig) -> Self {
        let (stats, _) = watch::channel(QueueStats::default());
        Self {
            store,
            config,
            stats: Arc::new(stats),
        }
    }

    /// Add an operation, replacing any active one on the same path.
    pub async fn enqueue(&self, operation: &PendingOperation) -> Result<Option<OperationId>> {
        let replaced = self.store.enqueue_or_replace(operation).await?;
        if let Some(previous) = &replaced {
            tracing::debug!(
                path = %operation.file_path,
                replaced = %previous,
                "Replaced pending operation"
            );
        }
        self.refresh_stats().await?;
        Ok(replaced)
    }

    /// Active operations, FIFO.
    pub async fn snapshot(&self) -> Result<Vec<PendingOperation>> {
        self.store.list_pending().await
    }

    /// Watch queue statistics; the current value is available immediately.
    pub fn subscribe(&self) -> watch::Receiver<QueueStats> {
        self.stats.subscribe()
    }

    /// Recount statuses and publish them to subscribers.
    pub async fn refresh_stats(&self) -> Result<QueueStats> {
        let counts = self.store.operation_counts().await?;
        let count = |status| counts.get(&status).copied().unwrap_or(0);
        let stats = QueueStats {
            pending: count(OperationStatus::Pending),
            retrying: count(OperationStatus::Retrying),
            failed: count(OperationStatus::Failed),
            completed: count(OperationStatus::Completed),
        };
        self.stats.send_replace(stats);
        Ok(stats)
    }

    /// Move a failed operation back to `pending` with a fresh retry budget.
    pub async fn retry(&self, id: &OperationId) -> Result<PendingOperation> {
        let mut operation = self
            .store
            .get_operation(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))?;
        if operation.status != OperationStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "operation {id} is {}, only failed operations can be retried",
                operation.status
            )));
        }

        let superseded = self.store.list_pending().await?.into_iter().any(|active| {
            active.folder_id == operation.folder_id && active.file_path == operation.file_path
        });
        if superseded {
            return Err(Error::InvalidInput(format!(
                "a newer operation on {} is already queued",
                operation.file_path
            )));
        }

        operation.status = OperationStatus::Pending;
        operation.retry_count = 0;
        operation.error_message = None;
        operation.next_attempt_at = None;
        self.store.update_operation(&operation).await?;
        tracing::info!(operation = %id, path = %operation.file_path, "Operation re-queued");
        self.refresh_stats().await?;
        Ok(operation)
    }

    /// Remove an operation that has not completed.
    pub async fn cancel(&self, id: &OperationId) -> Result<()> {
        let operation = self
            .store
            .get_operation(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))?;
        if operation.status == OperationStatus::Completed {
            return Err(Error::InvalidInput(format!(
                "operation {id} already completed"
            )));
        }
        self.store.delete_operation(id).await?;
        tracing::info!(operation = %id, path = %operation.file_path, "Operation cancelled");
        self.refresh_stats().await?;
        Ok(())
    }

    /// Execute every due operation, at most `max_concurrent_transfers` at once.
    ///
    /// Cancellation is checked before each operation starts; operations that
    /// already started run to completion (or honor the token themselves).
    pub async fn process_due(
        &self,
        now: i64,
        executor: Arc<dyn OperationExecutor>,
        cancel: &CancellationToken,
    ) -> Result<ProcessReport> {
        let due: Vec<PendingOperation> = self
            .store
            .list_pending()
            .await?
            .into_iter()
            .filter(|operation| operation.is_due(now))
            .collect();
        if due.is_empty() {
            return Ok(ProcessReport::default());
        }
        tracing::debug!(count = due.len(), "Processing due operations");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_transfers.max(1)));
        let mut tasks = JoinSet::new();
        for operation in due {
            if cancel.is_cancelled() {
                break;
            }
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| Error::Cancelled)?;
            if cancel.is_cancelled() {
                break;
            }

            // Re-read: it may have been cancelled or replaced meanwhile
            let Some(current) = self.store.get_operation(&operation.id).await? else {
                continue;
            };
            if !current.is_due(now) {
                continue;
            }

            let executor = Arc::clone(&executor);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = executor.execute(&current, &cancel).await;
                (current, result)
            });
        }

        let mut report = ProcessReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((operation, result)) => {
                    if let Some(status) = self.record_outcome(operation, result, now).await? {
                        match status {
                            OperationStatus::Completed => report.completed += 1,
                            OperationStatus::Retrying => report.retrying += 1,
                            OperationStatus::Failed => report.failed += 1,
                            OperationStatus::Pending => {}
                        }
                    }
                }
                // The operation stays active and is picked up next time
                Err(error) => tracing::error!(%error, "Operation task panicked"),
            }
        }

        self.refresh_stats().await?;
        Ok(report)
    }

    /// Apply the state machine to one attempt's result.
    async fn record_outcome(
        &self,
        mut operation: PendingOperation,
        result: Result<()>,
        now: i64,
    ) -> Result<Option<OperationStatus>> {
        match result {
            Ok(()) => {
                operation.status = OperationStatus::Completed;
                operation.completed_at = Some(now);
                operation.next_attempt_at = None;
                operation.error_message = None;
                tracing::info!(
                    operation = %operation.id,
                    kind = %operation.operation_type,
                    path = %operation.file_path,
                    "Operation completed"
                );
            }
            Err(Error::Cancelled) => return Ok(None),
            Err(error) => {
                operation.retry_count += 1;
                operation.last_retry_at = Some(now);
                operation.error_message = Some(util::compact_text(&error.to_string()));

                if error.class() == ErrorClass::Transient
                    && operation.retry_count < operation.max_retries
                {
                    let delay = backoff_delay(
                        operation.retry_count,
                        self.config.backoff_base(),
                        self.config.backoff_cap(),
                    );
                    operation.status = OperationStatus::Retrying;
                    operation.next_attempt_at = Some(now.saturating_add(duration_millis(delay)));
                    tracing::warn!(
                        operation = %operation.id,
                        path = %operation.file_path,
                        attempt = operation.retry_count,
                        delay_secs = delay.as_secs(),
                        %error,
                        "Operation failed; will retry"
                    );
                } else {
                    operation.status = OperationStatus::Failed;
                    operation.next_attempt_at = None;
                    tracing::warn!(
                        operation = %operation.id,
                        path = %operation.file_path,
                        attempts = operation.retry_count,
                        class = ?error.class(),
                        %error,
                        "Operation failed"
                    );
                }
            }
        }

        match self.store.update_operation(&operation).await {
            Ok(()) => Ok(Some(operation.status)),
            // Cancelled while running
            Err(Error::NotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Purge completed operations and resolved conflicts past retention.
    pub async fn cleanup(&self, now: i64) -> Result<CleanupReport> {
        let cutoff = now.saturating_sub(duration_millis(self.config.completed_retention()));
        let report = CleanupReport {
            operations: self.store.purge_completed(cutoff).await?,
            conflicts: self.store.purge_resolved_conflicts(cutoff).await?,
        };
        if report.operations > 0 || report.conflicts > 0 {
            tracing::info!(
                operations = report.operations,
                conflicts = report.conflicts,
                "Purged expired queue entries"
            );
        }
        self.refresh_stats().await?;
        Ok(report)
    }

    /// Drain due operations on an interval until cancelled.
    pub async fn run(
        &self,
        executor: Arc<dyn OperationExecutor>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut tick = tokio::time::interval(self.config.queue_poll_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Operation queue stopped");
                    return Ok(());
                }
                _ = tick.tick() => {
                    let now = util::now_millis();
                    if let Err(error) = self.process_due(now, Arc::clone(&executor), &cancel).await {
                        tracing::error!(%error, "Queue drain failed");
                    }
                    if let Err(error) = self.cleanup(now).await {
                        tracing::error!(%error, "Queue cleanup failed");
                    }
                }
            }
        }
    }
}
