//! Transaction batches: the pending writes of one unit of work.
//!
//! A batch collects queued statements from every repository bound to it and
//! carries a one-shot outcome channel. The caller keeps the
//! [`BatchOutcome`] and awaits it; the batcher settles the batch exactly once
//! after the physical transaction that contained it commits or fails.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use storefront_core::error::DomainError;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Outcome delivered to the caller that owns a batch.
pub type BatchResult = Result<(), DomainError>;

/// An owned bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Floating point value.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Uuid> for SqlValue {
    fn from(value: Uuid) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Integer(value.timestamp_millis())
    }
}

impl From<&serde_json::Value> for SqlValue {
    fn from(value: &serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// What a queued statement writes, used to classify failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Insert into `events`; a unique violation means a concurrent writer
    /// already produced this version.
    AppendEvent {
        /// Aggregate the event belongs to.
        aggregate_id: Uuid,
        /// Version the event produces.
        version: i64,
    },
    /// Upsert into `snapshots`.
    SaveSnapshot,
    /// Insert into `outbox`.
    Outbox,
    /// Read-model write issued by a projector.
    ReadModel,
    /// Anything else.
    Other,
}

/// One statement with its parameters.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    /// SQL text with `?` placeholders.
    pub statement: String,
    /// Bind parameters in placeholder order.
    pub params: Vec<SqlValue>,
    /// Classification of the write.
    pub kind: WriteKind,
}

impl QueuedCommand {
    /// Creates a queued statement.
    #[must_use]
    pub fn new(statement: impl Into<String>, params: Vec<SqlValue>, kind: WriteKind) -> Self {
        Self {
            statement: statement.into(),
            params,
            kind,
        }
    }

    /// Builds the executable query with every parameter bound.
    pub(crate) fn query(&self) -> Query<'_, Sqlite, SqliteArguments<'_>> {
        self.params
            .iter()
            .fold(sqlx::query(&self.statement), |query, param| match param {
                SqlValue::Null => query.bind(None::<i64>),
                SqlValue::Integer(v) => query.bind(*v),
                SqlValue::Real(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.as_str()),
                SqlValue::Blob(v) => query.bind(v.as_slice()),
            })
    }
}

/// Cloneable handle through which repositories queue writes into a batch.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    batch_id: Uuid,
    commands: Arc<Mutex<Vec<QueuedCommand>>>,
}

impl BatchWriter {
    /// The batch this writer appends to.
    #[must_use]
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Appends a statement to the batch.
    pub fn push(&self, command: QueuedCommand) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }

    /// Number of statements queued so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when nothing has been queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The pending writes of one unit of work plus its settlement channel.
#[derive(Debug)]
pub struct TransactionBatch {
    writer: BatchWriter,
    outcome: Option<oneshot::Sender<BatchResult>>,
}

impl TransactionBatch {
    /// Creates an empty batch and the outcome handle its caller awaits.
    #[must_use]
    pub fn new() -> (Self, BatchOutcome) {
        let batch_id = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        let batch = Self {
            writer: BatchWriter {
                batch_id,
                commands: Arc::new(Mutex::new(Vec::new())),
            },
            outcome: Some(tx),
        };
        (batch, BatchOutcome { batch_id, rx })
    }

    /// The batch identifier, used in logs.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.writer.batch_id
    }

    /// Returns a writer bound to this batch.
    #[must_use]
    pub fn writer(&self) -> BatchWriter {
        self.writer.clone()
    }

    /// Appends a statement to the batch.
    pub fn add_command(&self, command: QueuedCommand) {
        self.writer.push(command);
    }

    /// Number of statements queued so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writer.len()
    }

    /// Returns `true` when nothing has been queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writer.is_empty()
    }

    /// Returns `true` once the batch has been resolved or rejected.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.outcome.is_none()
    }

    /// Moves the queued statements out; the batch is sealed from here on.
    pub(crate) fn take_commands(&self) -> Vec<QueuedCommand> {
        std::mem::take(
            &mut *self
                .writer
                .commands
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Settles the batch successfully. Returns `false` if it was already
    /// settled.
    pub fn resolve(&mut self) -> bool {
        self.settle(Ok(()))
    }

    /// Settles the batch with `err`. Returns `false` if it was already
    /// settled.
    pub fn reject(&mut self, err: DomainError) -> bool {
        self.settle(Err(err))
    }

    fn settle(&mut self, result: BatchResult) -> bool {
        match self.outcome.take() {
            Some(tx) => {
                // The caller may have stopped waiting; that is not an error.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

/// The caller's end of a batch's one-shot outcome channel.
#[derive(Debug)]
pub struct BatchOutcome {
    batch_id: Uuid,
    rx: oneshot::Receiver<BatchResult>,
}

impl BatchOutcome {
    /// The batch this outcome belongs to.
    #[must_use]
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Waits until the batch is settled.
    ///
    /// # Errors
    ///
    /// Returns the batch's rejection error, or `DomainError::Infrastructure`
    /// if the batch was dropped without being settled.
    pub async fn wait(self) -> BatchResult {
        self.rx.await.unwrap_or_else(|_| {
            Err(DomainError::Infrastructure(format!(
                "batch {} was dropped before it was settled",
                self.batch_id
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(value: &str) -> QueuedCommand {
        QueuedCommand::new(
            "INSERT INTO t (v) VALUES (?)",
            vec![SqlValue::from(value)],
            WriteKind::Other,
        )
    }

    #[tokio::test]
    async fn test_resolve_settles_outcome_once() {
        // Arrange
        let (mut batch, outcome) = TransactionBatch::new();

        // Act
        let first = batch.resolve();
        let second = batch.reject(DomainError::Infrastructure("late".into()));

        // Assert
        assert!(first);
        assert!(!second);
        assert!(batch.is_settled());
        assert!(outcome.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_reject_delivers_error_to_caller() {
        let (mut batch, outcome) = TransactionBatch::new();

        batch.reject(DomainError::BatchExecution("boom".into()));

        match outcome.wait().await {
            Err(DomainError::BatchExecution(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected BatchExecution, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropped_batch_reports_infrastructure_error() {
        let (batch, outcome) = TransactionBatch::new();
        let batch_id = batch.id();

        drop(batch);

        match outcome.wait().await {
            Err(DomainError::Infrastructure(msg)) => {
                assert!(msg.contains(&batch_id.to_string()));
            }
            other => panic!("expected Infrastructure, got {other:?}"),
        }
    }

    #[test]
    fn test_writers_share_the_batch_queue() {
        // Arrange
        let (batch, _outcome) = TransactionBatch::new();
        let writer_a = batch.writer();
        let writer_b = batch.writer();

        // Act
        writer_a.push(insert("a"));
        writer_b.push(insert("b"));
        batch.add_command(insert("c"));

        // Assert
        assert_eq!(batch.len(), 3);
        let taken = batch.take_commands();
        assert_eq!(taken.len(), 3);
        assert_eq!(taken[1].params, vec![SqlValue::Text("b".into())]);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_optional_values_bind_as_null() {
        let missing: Option<i64> = None;

        assert_eq!(SqlValue::from(missing), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(4_i64)), SqlValue::Integer(4));
    }
}
