//! Batch-bound repositories.
//!
//! Every repository created for a unit of work shares that unit's
//! [`BatchWriter`]: writes are queued into the batch and only reach the
//! database when the batcher commits it. Reads go straight to the pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use storefront_core::aggregate::AggregateRoot;
use storefront_core::error::DomainError;
use storefront_core::event::{DomainEvent, StoredEvent};
use storefront_core::snapshot::Snapshot;
use uuid::Uuid;

use crate::batch::{BatchWriter, QueuedCommand, SqlValue, WriteKind};
use crate::codec::{db_error, json_from_text, timestamp_from_millis, uuid_from_text};

const UPSERT_SNAPSHOT: &str = r"
INSERT INTO snapshots (aggregate_id, correlation_id, version, payload)
VALUES (?, ?, ?, ?)
ON CONFLICT (aggregate_id) DO UPDATE SET
    correlation_id = excluded.correlation_id,
    version = excluded.version,
    payload = excluded.payload
";

const INSERT_EVENT: &str = r"
INSERT INTO events (aggregate_id, version, event_type, correlation_id, occurred_at, user_id, payload)
VALUES (?, ?, ?, ?, ?, ?, ?)
";

const INSERT_OUTBOX: &str = r"
INSERT INTO outbox (id, aggregate_id, event_type, payload, status, retry_count, created_at, idempotency_key)
VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)
";

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    aggregate_id: String,
    correlation_id: String,
    version: i64,
    payload: String,
}

impl TryFrom<SnapshotRow> for Snapshot {
    type Error = DomainError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(Self {
            aggregate_id: uuid_from_text(&row.aggregate_id)?,
            correlation_id: uuid_from_text(&row.correlation_id)?,
            version: row.version,
            payload: json_from_text(&row.payload)?,
        })
    }
}

/// Reads and upserts aggregate snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    pool: SqlitePool,
    writer: BatchWriter,
    pending: Arc<Mutex<HashMap<Uuid, Snapshot>>>,
}

impl SnapshotRepository {
    /// Creates a repository queuing into `writer`.
    #[must_use]
    pub fn new(pool: SqlitePool, writer: BatchWriter) -> Self {
        Self {
            pool,
            writer,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the latest snapshot of an aggregate.
    ///
    /// A snapshot saved earlier in the same batch wins over the committed one.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the read fails or the row
    /// cannot be decoded.
    pub async fn get_snapshot(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        let staged = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&aggregate_id)
            .cloned();
        if staged.is_some() {
            return Ok(staged);
        }

        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT aggregate_id, correlation_id, version, payload FROM snapshots WHERE aggregate_id = ?",
        )
        .bind(aggregate_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Snapshot::try_from).transpose()
    }

    /// Queues an upsert of `snapshot`.
    pub fn save_snapshot(&self, snapshot: Snapshot) {
        self.writer.push(QueuedCommand::new(
            UPSERT_SNAPSHOT,
            vec![
                snapshot.aggregate_id.into(),
                snapshot.correlation_id.into(),
                snapshot.version.into(),
                (&snapshot.payload).into(),
            ],
            WriteKind::SaveSnapshot,
        ));
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.aggregate_id, snapshot);
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct EventRow {
    aggregate_id: String,
    version: i64,
    event_type: String,
    correlation_id: String,
    occurred_at: i64,
    user_id: String,
    payload: String,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            event_name: row.event_type,
            aggregate_id: uuid_from_text(&row.aggregate_id)?,
            version: row.version,
            correlation_id: uuid_from_text(&row.correlation_id)?,
            user_id: row.user_id,
            occurred_at: timestamp_from_millis(row.occurred_at)?,
            payload: json_from_text(&row.payload)?,
        })
    }
}

/// Appends to and reads the audit event log.
#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
    writer: BatchWriter,
    new_events: Arc<Mutex<Vec<StoredEvent>>>,
}

impl EventRepository {
    /// Creates a repository queuing into `writer`.
    #[must_use]
    pub fn new(pool: SqlitePool, writer: BatchWriter) -> Self {
        Self {
            pool,
            writer,
            new_events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queues `event` for insertion.
    pub fn add_event(&self, event: &StoredEvent) {
        self.writer.push(QueuedCommand::new(
            INSERT_EVENT,
            vec![
                event.aggregate_id.into(),
                event.version.into(),
                event.event_name.as_str().into(),
                event.correlation_id.into(),
                event.occurred_at.into(),
                event.user_id.as_str().into(),
                (&event.payload).into(),
            ],
            WriteKind::AppendEvent {
                aggregate_id: event.aggregate_id,
                version: event.version,
            },
        ));
        self.new_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }

    /// Events added through this repository, in insertion order.
    #[must_use]
    pub fn new_events(&self) -> Vec<StoredEvent> {
        self.new_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Committed history of an aggregate ordered by version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the read fails or a row
    /// cannot be decoded.
    pub async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT aggregate_id, version, event_type, correlation_id, occurred_at, user_id, payload \
             FROM events WHERE aggregate_id = ? ORDER BY version ASC",
        )
        .bind(aggregate_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(StoredEvent::try_from).collect()
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Waiting for the consumer.
    Pending,
    /// Claimed by the consumer.
    Processing,
    /// Delivered.
    Completed,
    /// Gave up.
    Failed,
}

impl OutboxStatus {
    /// Column value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::Infrastructure(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

/// Extra columns written alongside an outbox event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxMeta {
    /// Deduplication key for the consumer.
    pub idempotency_key: Option<String>,
}

impl OutboxMeta {
    /// Meta keyed by the event's aggregate and version, which is unique.
    #[must_use]
    pub fn for_event(event: &StoredEvent) -> Self {
        Self {
            idempotency_key: Some(format!("{}:{}", event.aggregate_id, event.version)),
        }
    }
}

/// A row of the outbox table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    /// Entry identifier.
    pub id: Uuid,
    /// Aggregate the event belongs to.
    pub aggregate_id: Uuid,
    /// Event name.
    pub event_type: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Delivery state.
    pub status: OutboxStatus,
    /// Delivery attempts so far.
    pub retry_count: i64,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// Deduplication key.
    pub idempotency_key: Option<String>,
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: String,
    aggregate_id: String,
    event_type: String,
    payload: String,
    status: String,
    retry_count: i64,
    created_at: i64,
    idempotency_key: Option<String>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = DomainError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: uuid_from_text(&row.id)?,
            aggregate_id: uuid_from_text(&row.aggregate_id)?,
            event_type: row.event_type,
            payload: json_from_text(&row.payload)?,
            status: OutboxStatus::parse(&row.status)?,
            retry_count: row.retry_count,
            created_at: timestamp_from_millis(row.created_at)?,
            idempotency_key: row.idempotency_key,
        })
    }
}

/// Writes events to the transactional outbox.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
    writer: BatchWriter,
}

impl OutboxRepository {
    /// Creates a repository queuing into `writer`.
    #[must_use]
    pub fn new(pool: SqlitePool, writer: BatchWriter) -> Self {
        Self { pool, writer }
    }

    /// Queues a pending outbox entry for `event` and returns its id.
    pub fn add_outbox_event(&self, event: &StoredEvent, meta: OutboxMeta) -> Uuid {
        let id = Uuid::now_v7();
        self.writer.push(QueuedCommand::new(
            INSERT_OUTBOX,
            vec![
                id.into(),
                event.aggregate_id.into(),
                event.event_name.as_str().into(),
                (&event.payload).into(),
                event.occurred_at.into(),
                SqlValue::from(meta.idempotency_key),
            ],
            WriteKind::Outbox,
        ));
        id
    }

    /// Oldest pending entries, at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the read fails.
    pub async fn pending(&self, limit: i64) -> Result<Vec<OutboxEntry>, DomainError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            "SELECT id, aggregate_id, event_type, payload, status, retry_count, created_at, idempotency_key \
             FROM outbox WHERE status = 'pending' ORDER BY created_at ASC, id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(OutboxEntry::try_from).collect()
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// The repositories of one unit of work, all bound to the same batch.
#[derive(Debug, Clone)]
pub struct Repositories {
    /// Snapshot store.
    pub snapshots: SnapshotRepository,
    /// Event log.
    pub events: EventRepository,
    /// Transactional outbox.
    pub outbox: OutboxRepository,
    writer: BatchWriter,
    pool: SqlitePool,
}

impl Repositories {
    /// Creates the repository bundle for the batch behind `writer`.
    #[must_use]
    pub fn new(pool: SqlitePool, writer: BatchWriter) -> Self {
        Self {
            snapshots: SnapshotRepository::new(pool.clone(), writer.clone()),
            events: EventRepository::new(pool.clone(), writer.clone()),
            outbox: OutboxRepository::new(pool.clone(), writer.clone()),
            writer,
            pool,
        }
    }

    /// Writer for read-model statements issued by projectors.
    #[must_use]
    pub fn writer(&self) -> &BatchWriter {
        &self.writer
    }

    /// Pool for read-model queries.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Loads an aggregate from its snapshot, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the read or decode fails.
    pub async fn find_aggregate<A: AggregateRoot>(
        &self,
        aggregate_id: Uuid,
    ) -> Result<Option<A>, DomainError> {
        self.snapshots
            .get_snapshot(aggregate_id)
            .await?
            .as_ref()
            .map(A::load_from_snapshot)
            .transpose()
    }

    /// Loads an aggregate from its snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if no snapshot exists.
    pub async fn load_aggregate<A: AggregateRoot>(&self, aggregate_id: Uuid) -> Result<A, DomainError> {
        self.find_aggregate(aggregate_id)
            .await?
            .ok_or(DomainError::AggregateNotFound(aggregate_id))
    }

    /// Loads an aggregate and checks it is still at `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if another command has
    /// moved the aggregate on, or `AggregateNotFound` if it does not exist.
    pub async fn load_aggregate_at<A: AggregateRoot>(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
    ) -> Result<A, DomainError> {
        let aggregate: A = self.load_aggregate(aggregate_id).await?;
        if aggregate.version() != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: aggregate.version(),
            });
        }
        Ok(aggregate)
    }

    /// Queues the aggregate's uncommitted events, their outbox entries, and
    /// its new snapshot, then clears the uncommitted events.
    ///
    /// Returns the queued events. An aggregate without uncommitted events is
    /// left alone.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if an event or the state cannot
    /// be serialized; nothing is queued in that case.
    pub fn save_aggregate<A: AggregateRoot>(
        &self,
        aggregate: &mut A,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let stored = aggregate
            .uncommitted_events()
            .iter()
            .map(DomainEvent::to_stored)
            .collect::<Result<Vec<_>, _>>()?;
        let Some(last) = stored.last() else {
            return Ok(stored);
        };
        let snapshot = Snapshot {
            aggregate_id: aggregate.aggregate_id(),
            correlation_id: last.correlation_id,
            version: aggregate.version(),
            payload: serde_json::to_value(aggregate.to_snapshot())?,
        };

        for event in &stored {
            self.events.add_event(event);
            self.outbox
                .add_outbox_event(event, OutboxMeta::for_event(event));
        }
        self.snapshots.save_snapshot(snapshot);
        aggregate.clear_uncommitted_events();

        tracing::trace!(
            aggregate_type = A::AGGREGATE_TYPE,
            aggregate_id = %aggregate.aggregate_id(),
            version = aggregate.version(),
            events = stored.len(),
            "aggregate staged"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::TransactionBatch;
    use crate::batcher::{BatcherConfig, TransactionBatcher};
    use crate::database::connect_in_memory;
    use crate::testing::Counter;

    async fn commit(pool: &SqlitePool, batch: TransactionBatch) {
        let batcher = TransactionBatcher::new(pool.clone(), BatcherConfig::default());
        batcher.enqueue(batch).unwrap();
        let report = batcher.flush().await;
        assert_eq!(report.rejected, 0);
    }

    #[tokio::test]
    async fn test_pending_snapshot_is_visible_before_commit() {
        // Arrange
        let pool = connect_in_memory().await.unwrap();
        let (batch, _outcome) = TransactionBatch::new();
        let repos = Repositories::new(pool.clone(), batch.writer());
        let id = Uuid::new_v4();

        // Act
        repos.snapshots.save_snapshot(Snapshot {
            aggregate_id: id,
            correlation_id: Uuid::new_v4(),
            version: 0,
            payload: serde_json::json!({"id": id, "count": 0}),
        });

        // Assert
        let staged = repos.snapshots.get_snapshot(id).await.unwrap();
        assert_eq!(staged.map(|s| s.version), Some(0));
        let fresh = Repositories::new(pool, TransactionBatch::new().0.writer());
        assert!(fresh.snapshots.get_snapshot(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_aggregate_writes_events_outbox_and_snapshot() {
        // Arrange
        let pool = connect_in_memory().await.unwrap();
        let (batch, _outcome) = TransactionBatch::new();
        let repos = Repositories::new(pool.clone(), batch.writer());
        let mut counter = Counter::create(Uuid::new_v4());
        counter.increment();
        let correlation_id = counter.correlation_id();

        // Act
        let stored = repos.save_aggregate(&mut counter).unwrap();
        commit(&pool, batch).await;

        // Assert
        assert_eq!(stored.len(), 2);
        assert!(counter.uncommitted_events().is_empty());
        let reader = Repositories::new(pool.clone(), TransactionBatch::new().0.writer());
        let history = reader.events.load_events(counter.aggregate_id()).await.unwrap();
        let names: Vec<&str> = history.iter().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, vec!["counter.created", "counter.incremented"]);
        let snapshot = reader
            .snapshots
            .get_snapshot(counter.aggregate_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.correlation_id, correlation_id);
        let outbox = reader.outbox.pending(10).await.unwrap();
        assert_eq!(outbox.len(), 2);
        assert!(outbox.iter().all(|e| e.status == OutboxStatus::Pending));
        assert_eq!(
            outbox[0].idempotency_key.as_deref(),
            Some(format!("{}:0", counter.aggregate_id()).as_str())
        );
    }

    #[tokio::test]
    async fn test_load_aggregate_at_detects_stale_version() {
        // Arrange
        let pool = connect_in_memory().await.unwrap();
        let (batch, _outcome) = TransactionBatch::new();
        let repos = Repositories::new(pool.clone(), batch.writer());
        let mut counter = Counter::create(Uuid::new_v4());
        counter.increment();
        counter.increment();
        repos.save_aggregate(&mut counter).unwrap();
        commit(&pool, batch).await;
        let reader = Repositories::new(pool, TransactionBatch::new().0.writer());

        // Act
        let result = reader
            .load_aggregate_at::<Counter>(counter.aggregate_id(), 1)
            .await;

        // Assert
        match result {
            Err(DomainError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_missing_aggregate_is_not_found() {
        let pool = connect_in_memory().await.unwrap();
        let repos = Repositories::new(pool, TransactionBatch::new().0.writer());
        let id = Uuid::new_v4();

        let result = repos.load_aggregate::<Counter>(id).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_save_aggregate_without_events_queues_nothing() {
        // Arrange
        let pool = connect_in_memory().await.unwrap();
        let (batch, _outcome) = TransactionBatch::new();
        let repos = Repositories::new(pool, batch.writer());
        let mut counter = Counter::create(Uuid::new_v4());
        counter.clear_uncommitted_events();

        // Act
        let stored = repos.save_aggregate(&mut counter).unwrap();

        // Assert
        assert!(stored.is_empty());
        assert!(batch.is_empty());
    }
}
