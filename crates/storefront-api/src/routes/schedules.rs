//! Routes for the Scheduled Commands context.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Json, Router, routing::get, routing::post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_core::command::{AccessLevel, Service};
use storefront_scheduler::application::query_handlers::{self, ScheduleView};
use storefront_scheduler::domain::aggregates::ScheduleStatus;
use storefront_scheduler::domain::commands::{CancelSchedule, CreateSchedule};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the caller's user ID.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's role; `admin` grants admin access.
pub const USER_ROLE_HEADER: &str = "x-user-role";

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    /// Client-chosen schedule ID; generated when absent.
    pub schedule_id: Option<Uuid>,
    /// Aggregate the scheduled command targets.
    pub target_aggregate_id: Uuid,
    /// Type of that aggregate.
    pub target_aggregate_type: String,
    /// Registry key of the handler to run.
    pub command_type: String,
    /// Command body handed to the handler.
    #[serde(default = "empty_object")]
    pub command_data: serde_json::Value,
    /// Earliest execution instant.
    pub scheduled_for: DateTime<Utc>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Request body for POST /{id}/cancel.
#[derive(Debug, Deserialize)]
pub struct CancelScheduleRequest {
    /// Schedule version the caller last saw.
    pub expected_version: i64,
}

/// Query string for GET /.
#[derive(Debug, Deserialize)]
pub struct ListSchedulesQuery {
    /// Status filter; defaults to `pending`.
    pub status: Option<String>,
    /// Maximum rows returned.
    pub limit: Option<i64>,
}

/// Response body returned after a command is accepted and committed.
#[derive(Debug, Serialize)]
pub struct ScheduleCommandResponse {
    /// The schedule the command applied to.
    pub schedule_id: Uuid,
    /// Correlation ID of the command's events.
    pub correlation_id: Uuid,
}

/// Resolves the caller's user ID, enforcing `required`.
///
/// # Errors
///
/// Returns `ApiError::Unauthenticated` when a non-public service is called
/// without a user ID, or `ApiError::Forbidden` when an admin service is
/// called by a non-admin.
pub fn caller(headers: &HeaderMap, required: AccessLevel) -> Result<String, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned);
    let is_admin = headers
        .get(USER_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|role| role.eq_ignore_ascii_case("admin"));

    match (required, user_id) {
        (AccessLevel::Public, user_id) => Ok(user_id.unwrap_or_else(|| "anonymous".to_owned())),
        (_, None) => Err(ApiError::Unauthenticated),
        (AccessLevel::Admin, Some(_)) if !is_admin => Err(ApiError::Forbidden),
        (_, Some(user_id)) => Ok(user_id),
    }
}

/// POST /
#[instrument(skip(state, headers, request), fields(command_type = %request.command_type))]
async fn create_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleCommandResponse>), ApiError> {
    let user_id = caller(&headers, state.create_schedule.access_level())?;
    let command = CreateSchedule {
        correlation_id: Uuid::new_v4(),
        user_id,
        schedule_id: request.schedule_id.unwrap_or_else(Uuid::now_v7),
        target_aggregate_id: request.target_aggregate_id,
        target_aggregate_type: request.target_aggregate_type,
        command_type: request.command_type,
        command_data: request.command_data,
        scheduled_for: request.scheduled_for,
    };
    let response = ScheduleCommandResponse {
        schedule_id: command.schedule_id,
        correlation_id: command.correlation_id,
    };

    info!(
        correlation_id = %command.correlation_id,
        schedule_id = %command.schedule_id,
        scheduled_for = %command.scheduled_for,
        "handling create_schedule command"
    );
    state.create_schedule.execute(command).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /
#[instrument(skip_all)]
async fn list_schedules(
    State(state): State<AppState>,
    Query(query): Query<ListSchedulesQuery>,
) -> Result<Json<Vec<ScheduleView>>, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => ScheduleStatus::parse(raw)?,
        None => ScheduleStatus::Pending,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let schedules = query_handlers::list_schedules_by_status(&state.db_pool, status, limit).await?;
    Ok(Json(schedules))
}

/// GET /{id}
#[instrument(skip_all, fields(schedule_id = %schedule_id))]
async fn get_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<ScheduleView>, ApiError> {
    let view = query_handlers::get_schedule_by_id(&state.db_pool, schedule_id).await?;
    Ok(Json(view))
}

/// POST /{id}/cancel
#[instrument(skip_all, fields(schedule_id = %schedule_id))]
async fn cancel_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(schedule_id): Path<Uuid>,
    Json(request): Json<CancelScheduleRequest>,
) -> Result<Json<ScheduleCommandResponse>, ApiError> {
    let user_id = caller(&headers, state.cancel_schedule.access_level())?;
    let command = CancelSchedule {
        correlation_id: Uuid::new_v4(),
        user_id,
        schedule_id,
        expected_version: request.expected_version,
    };
    let response = ScheduleCommandResponse {
        schedule_id,
        correlation_id: command.correlation_id,
    };

    info!(
        correlation_id = %command.correlation_id,
        expected_version = command.expected_version,
        "handling cancel_schedule command"
    );
    state.cancel_schedule.execute(command).await?;

    Ok(Json(response))
}

/// Returns the router for the scheduler context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_schedule).get(list_schedules))
        .route("/{id}", get(get_schedule))
        .route("/{id}/cancel", post(cancel_schedule))
}
