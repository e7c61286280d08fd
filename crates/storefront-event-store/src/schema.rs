//! Event store database schema.
//!
//! Every statement is idempotent so `apply_schema` can run on each startup.
//! Timestamps are unix milliseconds, identifiers are UUID text, and JSON
//! payloads are stored as text.

use sqlx::SqlitePool;
use storefront_core::error::DomainError;

/// SQL to create the events table.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS events (
    aggregate_id    TEXT    NOT NULL,
    version         INTEGER NOT NULL,
    event_type      TEXT    NOT NULL,
    correlation_id  TEXT    NOT NULL,
    occurred_at     INTEGER NOT NULL,
    user_id         TEXT    NOT NULL,
    payload         TEXT    NOT NULL,
    PRIMARY KEY (aggregate_id, version)
);

CREATE INDEX IF NOT EXISTS idx_events_correlation_id
    ON events (correlation_id);
";

/// SQL to create the snapshots table.
pub const CREATE_SNAPSHOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS snapshots (
    aggregate_id    TEXT    PRIMARY KEY,
    correlation_id  TEXT    NOT NULL,
    version         INTEGER NOT NULL,
    payload         TEXT    NOT NULL
);
";

/// SQL to create the outbox tables.
///
/// `outbox_processing` and `outbox_dlq` belong to the outbox consumer; they
/// are created here so the consumer can rely on them existing.
pub const CREATE_OUTBOX_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS outbox (
    id               TEXT    PRIMARY KEY,
    aggregate_id     TEXT    NOT NULL,
    event_type       TEXT    NOT NULL,
    payload          TEXT    NOT NULL,
    status           TEXT    NOT NULL DEFAULT 'pending'
                     CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    retry_count      INTEGER NOT NULL DEFAULT 0,
    created_at       INTEGER NOT NULL,
    last_attempt_at  INTEGER,
    next_retry_at    INTEGER,
    idempotency_key  TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_status
    ON outbox (status, created_at);

CREATE TABLE IF NOT EXISTS outbox_processing (
    id               TEXT    PRIMARY KEY,
    outbox_id        TEXT    NOT NULL REFERENCES outbox (id),
    handler_id       TEXT    NOT NULL,
    idempotency_key  TEXT    NOT NULL UNIQUE,
    status           TEXT    NOT NULL,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    processed_at     INTEGER
);

CREATE TABLE IF NOT EXISTS outbox_dlq (
    id                 TEXT    PRIMARY KEY,
    outbox_id          TEXT    NOT NULL REFERENCES outbox (id),
    handler_id         TEXT    NOT NULL,
    event_type         TEXT    NOT NULL,
    payload            TEXT    NOT NULL,
    error_message      TEXT    NOT NULL,
    final_retry_count  INTEGER NOT NULL,
    failed_at          INTEGER NOT NULL
);
";

/// SQL to create the schedules read model.
pub const CREATE_SCHEDULES_READ_MODEL: &str = r"
CREATE TABLE IF NOT EXISTS schedules_read_model (
    aggregate_id           TEXT    PRIMARY KEY,
    target_aggregate_id    TEXT    NOT NULL,
    target_aggregate_type  TEXT    NOT NULL,
    command_type           TEXT    NOT NULL,
    command_data           TEXT    NOT NULL,
    scheduled_for          INTEGER NOT NULL,
    status                 TEXT    NOT NULL,
    retry_count            INTEGER NOT NULL DEFAULT 0,
    next_retry_at          INTEGER,
    created_by             TEXT    NOT NULL,
    error_message          TEXT,
    correlation_id         TEXT    NOT NULL,
    version                INTEGER NOT NULL,
    created_at             INTEGER NOT NULL,
    updated_at             INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_schedules_status
    ON schedules_read_model (status);

CREATE INDEX IF NOT EXISTS idx_schedules_scheduled_for
    ON schedules_read_model (scheduled_for);

CREATE INDEX IF NOT EXISTS idx_schedules_status_scheduled_for
    ON schedules_read_model (status, scheduled_for);
";

/// SQL to create the products read model.
pub const CREATE_PRODUCTS_READ_MODEL: &str = r"
CREATE TABLE IF NOT EXISTS products_read_model (
    aggregate_id    TEXT    PRIMARY KEY,
    title           TEXT    NOT NULL,
    handle          TEXT    NOT NULL,
    status          TEXT    NOT NULL,
    version         INTEGER NOT NULL,
    correlation_id  TEXT    NOT NULL,
    updated_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_status
    ON products_read_model (status);
";

/// Every schema statement in creation order.
pub const ALL_TABLES: [&str; 5] = [
    CREATE_EVENTS_TABLE,
    CREATE_SNAPSHOTS_TABLE,
    CREATE_OUTBOX_TABLES,
    CREATE_SCHEDULES_READ_MODEL,
    CREATE_PRODUCTS_READ_MODEL,
];

/// Creates every table and index that does not exist yet.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if any statement fails.
pub async fn apply_schema(pool: &SqlitePool) -> Result<(), DomainError> {
    for ddl in ALL_TABLES {
        sqlx::raw_sql(ddl)
            .execute(pool)
            .await
            .map_err(|e| DomainError::Infrastructure(format!("schema setup failed: {e}")))?;
    }
    tracing::debug!(tables = ALL_TABLES.len(), "schema applied");
    Ok(())
}
