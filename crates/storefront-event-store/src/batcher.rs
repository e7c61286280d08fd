//! Background transaction batcher.
//!
//! Units of work never write to the database themselves; they hand a sealed
//! [`TransactionBatch`] to the batcher and await its outcome. The batcher is
//! the only writer: on every tick (or as soon as `batch_size_threshold`
//! batches are waiting) it drains the queue and runs all drained batches in a
//! single physical transaction. When that transaction fails, the failing
//! batches are located by repeatedly halving the group, so unrelated batches
//! still commit and only the offenders are rejected.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sqlx::{SqliteConnection, SqlitePool};
use storefront_core::error::DomainError;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::batch::{QueuedCommand, TransactionBatch, WriteKind};

/// Default flush period.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 50;

/// Default number of queued batches that triggers an immediate flush.
pub const DEFAULT_BATCH_SIZE_THRESHOLD: usize = 100;

/// Default maximum number of queued batches.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 1000;

/// Configuration for the transaction batcher.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Period of the background flush.
    pub flush_interval: Duration,
    /// Queue length that wakes the flush loop early.
    pub batch_size_threshold: usize,
    /// Queue length beyond which new batches are rejected.
    pub max_queue_depth: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            batch_size_threshold: DEFAULT_BATCH_SIZE_THRESHOLD,
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
        }
    }
}

/// Counters describing one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Batches drained from the queue.
    pub batches: usize,
    /// Batches resolved successfully.
    pub committed: usize,
    /// Batches rejected.
    pub rejected: usize,
    /// Physical transactions attempted.
    pub transactions: usize,
}

/// A batch whose statements have been moved out for execution.
struct PendingBatch {
    batch: TransactionBatch,
    commands: Vec<QueuedCommand>,
}

/// Why a group of batches could not be committed.
struct GroupFailure {
    error: sqlx::Error,
    kind: Option<WriteKind>,
    batch_id: Option<Uuid>,
}

impl GroupFailure {
    fn transaction_control(error: sqlx::Error) -> Self {
        Self {
            error,
            kind: None,
            batch_id: None,
        }
    }

    /// Maps the failure to the error the offending batch is rejected with.
    fn into_domain_error(self) -> DomainError {
        if let Some(WriteKind::AppendEvent {
            aggregate_id,
            version,
        }) = self.kind
        {
            if let sqlx::Error::Database(db) = &self.error {
                if db.is_unique_violation() {
                    return DomainError::ConcurrencyConflict {
                        aggregate_id,
                        expected: version - 1,
                        actual: version,
                    };
                }
            }
        }
        DomainError::BatchExecution(self.error.to_string())
    }
}

/// Work item of the failure isolation loop.
enum Step {
    /// The group is known to contain a failure; split it.
    Isolate(Vec<PendingBatch>),
    /// The group has not been tried on its own yet.
    Attempt(Vec<PendingBatch>),
}

struct BatcherInner {
    pool: SqlitePool,
    config: BatcherConfig,
    queue: Mutex<VecDeque<PendingBatch>>,
    threshold_reached: Notify,
    flush_lock: tokio::sync::Mutex<()>,
}

/// Accumulates transaction batches and commits them in groups.
///
/// Cloning is cheap; clones share one queue.
#[derive(Clone)]
pub struct TransactionBatcher {
    inner: Arc<BatcherInner>,
}

impl std::fmt::Debug for TransactionBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBatcher")
            .field("config", &self.inner.config)
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

impl TransactionBatcher {
    /// Creates a batcher writing to `pool`. Nothing is flushed until
    /// [`start`](Self::start) or [`flush`](Self::flush) is called.
    #[must_use]
    pub fn new(pool: SqlitePool, config: BatcherConfig) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                pool,
                config,
                queue: Mutex::new(VecDeque::new()),
                threshold_reached: Notify::new(),
                flush_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Number of batches waiting for the next flush.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Seals `batch` and appends it to the queue.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Backpressure` when the queue already holds
    /// `max_queue_depth` batches. The batch is rejected with the same error
    /// and batches already queued are unaffected.
    pub fn enqueue(&self, mut batch: TransactionBatch) -> Result<(), DomainError> {
        let batch_id = batch.id();
        let commands = batch.take_commands();
        let max_queue_depth = self.inner.config.max_queue_depth;

        let mut queue = self
            .inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= max_queue_depth {
            drop(queue);
            tracing::warn!(%batch_id, max_queue_depth, "transaction queue full, rejecting batch");
            let err = DomainError::Backpressure { max_queue_depth };
            batch.reject(err.clone());
            return Err(err);
        }
        queue.push_back(PendingBatch { batch, commands });
        let depth = queue.len();
        drop(queue);

        tracing::trace!(%batch_id, depth, "batch enqueued");
        if depth >= self.inner.config.batch_size_threshold {
            self.inner.threshold_reached.notify_one();
        }
        Ok(())
    }

    /// Removes every queued batch in FIFO order.
    fn drain(&self) -> Vec<PendingBatch> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Drains the queue and commits it, isolating failing batches.
    ///
    /// Every drained batch is settled before this returns.
    #[tracing::instrument(name = "batcher.flush", skip(self))]
    pub async fn flush(&self) -> FlushReport {
        let _writer = self.inner.flush_lock.lock().await;
        let drained = self.drain();
        let mut report = FlushReport {
            batches: drained.len(),
            ..FlushReport::default()
        };
        if drained.is_empty() {
            return report;
        }

        let mut conn = match self.inner.pool.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(error = %e, batches = drained.len(), "could not acquire writer connection");
                let err = DomainError::Infrastructure(format!("writer connection unavailable: {e}"));
                for pending in drained {
                    reject(pending, err.clone(), &mut report);
                }
                return report;
            }
        };

        let commands: usize = drained.iter().map(|p| p.commands.len()).sum();
        tracing::debug!(batches = drained.len(), commands, "flushing transaction batches");

        report.transactions += 1;
        match execute_group(&mut conn, &drained).await {
            Ok(()) => {
                for pending in drained {
                    resolve(pending, &mut report);
                }
            }
            Err(failure) => {
                tracing::warn!(
                    batches = drained.len(),
                    failed_batch = ?failure.batch_id,
                    error = %failure.error,
                    "grouped transaction failed, isolating failing batches"
                );
                isolate(&mut conn, drained, &mut report).await;
            }
        }

        tracing::debug!(
            committed = report.committed,
            rejected = report.rejected,
            transactions = report.transactions,
            "flush complete"
        );
        report
    }

    /// Spawns the background flush loop.
    #[must_use]
    pub fn start(&self) -> BatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let batcher = self.clone();
        let task = tokio::spawn(async move { batcher.run(shutdown_rx).await });
        tracing::info!(
            flush_interval_ms = self.inner.config.flush_interval.as_millis(),
            batch_size_threshold = self.inner.config.batch_size_threshold,
            max_queue_depth = self.inner.config.max_queue_depth,
            "transaction batcher started"
        );
        BatcherHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                () = self.inner.threshold_reached.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            self.flush().await;
        }

        let report = self.flush().await;
        tracing::info!(final_batches = report.batches, "transaction batcher stopped");
    }
}

/// Handle to a running flush loop.
#[derive(Debug)]
pub struct BatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BatcherHandle {
    /// Stops the loop after a final flush of everything still queued.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "transaction batcher task failed");
        }
    }
}

/// Locates failing batches by halving.
///
/// A group that failed is split; the left half is tried on its own. If it
/// commits, the failure is in the right half, which is split in turn. If it
/// fails, the left half is split further and the right half is attempted
/// independently. Single batches are executed alone and settled with their
/// own result. Left halves are always finished before right halves, so
/// commits keep FIFO order.
async fn isolate(conn: &mut SqliteConnection, group: Vec<PendingBatch>, report: &mut FlushReport) {
    let mut steps = vec![Step::Isolate(group)];

    while let Some(step) = steps.pop() {
        match step {
            Step::Attempt(group) => {
                report.transactions += 1;
                match execute_group(conn, &group).await {
                    Ok(()) => group.into_iter().for_each(|p| resolve(p, report)),
                    Err(failure) => fail_group(group, failure, &mut steps, report),
                }
            }
            Step::Isolate(mut group) => {
                if group.len() <= 1 {
                    report.transactions += 1;
                    match execute_group(conn, &group).await {
                        Ok(()) => group.into_iter().for_each(|p| resolve(p, report)),
                        Err(failure) => fail_group(group, failure, &mut steps, report),
                    }
                    continue;
                }

                let right = group.split_off(group.len() / 2);
                let left = group;
                report.transactions += 1;
                match execute_group(conn, &left).await {
                    Ok(()) => {
                        left.into_iter().for_each(|p| resolve(p, report));
                        steps.push(Step::Isolate(right));
                    }
                    Err(failure) => {
                        steps.push(Step::Attempt(right));
                        fail_group(left, failure, &mut steps, report);
                    }
                }
            }
        }
    }
}

/// A group that failed on its own: a single batch is rejected with the
/// failure, a larger group is queued for further splitting.
fn fail_group(
    mut group: Vec<PendingBatch>,
    failure: GroupFailure,
    steps: &mut Vec<Step>,
    report: &mut FlushReport,
) {
    if group.len() == 1 {
        if let Some(pending) = group.pop() {
            reject(pending, failure.into_domain_error(), report);
        }
    } else {
        steps.push(Step::Isolate(group));
    }
}

/// Runs every statement of `group` inside one `BEGIN IMMEDIATE`/`COMMIT`.
async fn execute_group(
    conn: &mut SqliteConnection,
    group: &[PendingBatch],
) -> Result<(), GroupFailure> {
    rollback_stray(conn).await;
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(GroupFailure::transaction_control)?;

    for pending in group {
        for command in &pending.commands {
            if let Err(error) = command.query().execute(&mut *conn).await {
                rollback(conn).await;
                return Err(GroupFailure {
                    error,
                    kind: Some(command.kind),
                    batch_id: Some(pending.batch.id()),
                });
            }
        }
    }

    if let Err(error) = sqlx::query("COMMIT").execute(&mut *conn).await {
        rollback(conn).await;
        return Err(GroupFailure::transaction_control(error));
    }
    Ok(())
}

/// Rolls back a transaction left open by an earlier failure. Failing here is
/// the normal case (no transaction is active).
async fn rollback_stray(conn: &mut SqliteConnection) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::trace!(error = %e, "no stray transaction to roll back");
    }
}

async fn rollback(conn: &mut SqliteConnection) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::warn!(error = %e, "rollback after failed statement did not succeed");
    }
}

fn resolve(mut pending: PendingBatch, report: &mut FlushReport) {
    pending.batch.resolve();
    report.committed += 1;
}

fn reject(mut pending: PendingBatch, err: DomainError, report: &mut FlushReport) {
    tracing::error!(batch_id = %pending.batch.id(), error = %err, "transaction batch rejected");
    pending.batch.reject(err);
    report.rejected += 1;
}
