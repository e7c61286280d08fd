//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::SqlitePool;
use storefront_core::clock::Clock;
use storefront_event_store::batcher::{BatcherConfig, BatcherHandle, TransactionBatcher};
use storefront_event_store::database::connect_in_memory;
use storefront_event_store::unit_of_work::UnitOfWork;
use storefront_test_support::FixedClock;
use tower::ServiceExt;

use storefront_api::app;
use storefront_api::routes::schedules::USER_ID_HEADER;
use storefront_api::state::AppState;

/// Fixed timestamp used across all integration tests.
pub fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    ))
}

/// A wired application over a private in-memory database.
pub struct TestApp {
    /// Read pool, for assertions against tables.
    pub pool: SqlitePool,
    /// Unit of work shared with the router's services.
    pub uow: UnitOfWork,
    batcher: BatcherHandle,
}

impl TestApp {
    /// Opens the database, starts a fast batcher and wires the services.
    pub async fn start() -> Self {
        let pool = connect_in_memory().await.unwrap();
        let batcher = TransactionBatcher::new(
            pool.clone(),
            BatcherConfig {
                flush_interval: Duration::from_millis(10),
                ..BatcherConfig::default()
            },
        );
        let handle = batcher.start();
        let uow = app::unit_of_work(pool.clone(), batcher);
        Self {
            pool,
            uow,
            batcher: handle,
        }
    }

    /// Build the full app router. Uses the same route structure as `main.rs`.
    pub fn router(&self) -> Router {
        let state = AppState::new(self.pool.clone(), &self.uow, fixed_clock());
        app::router(state)
    }

    /// Drains the batcher.
    pub async fn stop(self) {
        self.batcher.shutdown().await;
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body as `user` and return the response.
pub async fn post_json_as(
    app: Router,
    uri: &str,
    user: Option<&str>,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    let request = builder
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a POST request with a JSON body as `merchant-1`.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    post_json_as(app, uri, Some("merchant-1"), body).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}
