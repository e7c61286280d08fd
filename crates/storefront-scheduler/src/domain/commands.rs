//! Commands for the Scheduled Commands context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storefront_core::command::{Command, CommandContext};
use uuid::Uuid;

/// Command to schedule another command for later execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSchedule {
    /// The correlation ID for tracing; becomes the schedule's own.
    #[serde(default = "Uuid::new_v4")]
    pub correlation_id: Uuid,
    /// The user creating the schedule.
    pub user_id: String,
    /// The schedule identifier.
    pub schedule_id: Uuid,
    /// Aggregate the scheduled command targets.
    pub target_aggregate_id: Uuid,
    /// Type of that aggregate, e.g. `product`.
    pub target_aggregate_type: String,
    /// Registry key of the handler to run.
    pub command_type: String,
    /// Command body handed to the handler.
    pub command_data: serde_json::Value,
    /// Earliest execution instant.
    pub scheduled_for: DateTime<Utc>,
}

impl Command for CreateSchedule {
    fn command_type(&self) -> &'static str {
        "schedule.create"
    }

    fn context(&self) -> CommandContext {
        CommandContext {
            correlation_id: self.correlation_id,
            user_id: self.user_id.clone(),
        }
    }
}

/// Command to cancel a pending or failed schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSchedule {
    /// The correlation ID for tracing.
    #[serde(default = "Uuid::new_v4")]
    pub correlation_id: Uuid,
    /// The user cancelling the schedule.
    pub user_id: String,
    /// The schedule identifier.
    pub schedule_id: Uuid,
    /// Schedule version the caller last saw.
    pub expected_version: i64,
}

impl Command for CancelSchedule {
    fn command_type(&self) -> &'static str {
        "schedule.cancel"
    }

    fn context(&self) -> CommandContext {
        CommandContext {
            correlation_id: self.correlation_id,
            user_id: self.user_id.clone(),
        }
    }
}
