//! End-to-end tests of the write path against a file-backed database.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use storefront_core::error::DomainError;
use storefront_core::event::StoredEvent;
use storefront_core::snapshot::Snapshot;
use storefront_event_store::batch::TransactionBatch;
use storefront_event_store::batcher::{BatcherConfig, TransactionBatcher};
use storefront_event_store::database::{DatabaseConfig, connect};
use storefront_event_store::repository::{OutboxMeta, Repositories};
use storefront_event_store::unit_of_work::UnitOfWork;
use uuid::Uuid;

fn temp_database() -> (DatabaseConfig, PathBuf) {
    let path = std::env::temp_dir().join(format!("storefront-{}.db", Uuid::new_v4()));
    let config = DatabaseConfig {
        url: format!("sqlite://{}", path.display()),
        ..DatabaseConfig::default()
    };
    (config, path)
}

fn cleanup(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.clone().into_os_string();
        file.push(suffix);
        let _ = std::fs::remove_file(file);
    }
}

fn created_event(aggregate_id: Uuid) -> StoredEvent {
    StoredEvent {
        event_name: "widget.created".to_owned(),
        aggregate_id,
        version: 0,
        correlation_id: Uuid::new_v4(),
        user_id: "integration".to_owned(),
        occurred_at: Utc::now(),
        payload: serde_json::json!({"priorState": null, "newState": {"id": aggregate_id}}),
    }
}

fn stage_widget(repos: &Repositories, aggregate_id: Uuid) {
    let event = created_event(aggregate_id);
    repos.events.add_event(&event);
    repos.outbox.add_outbox_event(&event, OutboxMeta::for_event(&event));
    repos.snapshots.save_snapshot(Snapshot {
        aggregate_id,
        correlation_id: event.correlation_id,
        version: 0,
        payload: serde_json::json!({"id": aggregate_id}),
    });
}

#[tokio::test]
async fn test_many_concurrent_units_of_work_all_commit() {
    // Arrange
    let (config, path) = temp_database();
    let pool = connect(&config).await.unwrap();
    let batcher = TransactionBatcher::new(
        pool.clone(),
        BatcherConfig {
            flush_interval: Duration::from_millis(20),
            batch_size_threshold: 10,
            ..BatcherConfig::default()
        },
    );
    let handle = batcher.start();
    let uow = UnitOfWork::new(pool.clone(), batcher);
    let ids: Vec<Uuid> = (0..40).map(|_| Uuid::new_v4()).collect();

    // Act
    let results = futures::future::join_all(ids.iter().map(|&id| {
        let uow = uow.clone();
        async move {
            uow.with_transaction(|repos| async move {
                stage_widget(&repos, id);
                Ok(())
            })
            .await
        }
    }))
    .await;

    // Assert
    assert!(results.iter().all(Result::is_ok));
    let events: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&pool)
        .await
        .unwrap();
    let snapshots: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(events, 40);
    assert_eq!(snapshots, 40);

    handle.shutdown().await;
    pool.close().await;
    cleanup(&path);
}

#[tokio::test]
async fn test_duplicate_creation_is_rejected_without_affecting_neighbours() {
    // Arrange
    let (config, path) = temp_database();
    let pool = connect(&config).await.unwrap();
    let batcher = TransactionBatcher::new(pool.clone(), BatcherConfig::default());
    let duplicated = Uuid::new_v4();
    let other = Uuid::new_v4();
    let mut outcomes = Vec::new();
    for id in [duplicated, other, duplicated] {
        let (batch, outcome) = TransactionBatch::new();
        stage_widget(&Repositories::new(pool.clone(), batch.writer()), id);
        batcher.enqueue(batch).unwrap();
        outcomes.push(outcome);
    }

    // Act
    let report = batcher.flush().await;

    // Assert
    assert_eq!(report.committed, 2);
    assert_eq!(report.rejected, 1);
    let mut results = Vec::new();
    for outcome in outcomes {
        results.push(outcome.wait().await);
    }
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(matches!(
        results[2],
        Err(DomainError::ConcurrencyConflict { expected: -1, actual: 0, .. })
    ));
    let reader = Repositories::new(pool.clone(), TransactionBatch::new().0.writer());
    assert_eq!(reader.events.load_events(duplicated).await.unwrap().len(), 1);
    assert_eq!(reader.outbox.pending(10).await.unwrap().len(), 2);

    pool.close().await;
    cleanup(&path);
}
