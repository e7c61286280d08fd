//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
    /// Whether the database answered.
    pub database: String,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db_pool)
        .await;

    let (status, code, database) = match database {
        Ok(_) => (StatusCode::OK, "ok", "ok".to_owned()),
        Err(e) => {
            tracing::warn!(error = %e, "health check database probe failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unavailable".to_owned())
        }
    };

    (
        status,
        Json(HealthResponse {
            status: code.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database,
        }),
    )
}

/// Returns the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
