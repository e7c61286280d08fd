//! Background poller that executes due schedules.
//!
//! Every tick the poller reads due schedules from the read model and runs
//! each one in its own unit of work: the registered handler's writes and the
//! schedule's `executed` transition commit together or not at all. The
//! attempts of one tick run concurrently, so the batcher can commit them in
//! a shared flush. A failed attempt is recorded in a second unit of work,
//! either planning a retry or failing the schedule once `max_retries`
//! attempts have been made.
//!
//! Handlers run on behalf of [`SCHEDULER_USER`] under the schedule's own
//! correlation ID.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use storefront_core::clock::Clock;
use storefront_core::command::CommandContext;
use storefront_core::error::DomainError;
use storefront_event_store::unit_of_work::UnitOfWork;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::application::query_handlers::{ScheduleView, find_due};
use crate::domain::aggregates::{FailureOutcome, SCHEDULER_USER, Schedule};
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default number of schedules picked up per tick.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Default number of attempts before a schedule fails.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Poller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between ticks.
    pub poll_interval: Duration,
    /// Maximum schedules executed per tick.
    pub batch_size: usize,
    /// Attempts before a failing schedule is given up.
    pub max_retries: u32,
    /// Backoff between attempts.
    pub retry_policy: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Schedules executed and committed.
    pub executed: usize,
    /// Schedules that failed and were rescheduled.
    pub retried: usize,
    /// Schedules that failed for good.
    pub failed: usize,
}

impl PollReport {
    /// Returns `true` when the tick touched no schedule.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.executed == 0 && self.retried == 0 && self.failed == 0
    }
}

enum Attempt {
    Executed,
    Retried,
    Failed,
    Skipped,
}

struct PollerInner {
    uow: UnitOfWork,
    registry: HandlerRegistry,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
}

/// Executes due schedules through their registered handlers.
#[derive(Clone)]
pub struct SchedulePoller {
    inner: Arc<PollerInner>,
}

impl std::fmt::Debug for SchedulePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulePoller")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl SchedulePoller {
    /// Creates a poller. Nothing runs until [`start`](Self::start) or
    /// [`poll_once`](Self::poll_once) is called.
    #[must_use]
    pub fn new(
        uow: UnitOfWork,
        registry: HandlerRegistry,
        clock: Arc<dyn Clock>,
        config: PollerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                uow,
                registry,
                clock,
                config,
            }),
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }

    /// Runs one tick: executes every schedule due now, up to `batch_size`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if due schedules cannot be
    /// read. Failures of individual schedules become state transitions and
    /// are reported in the returned [`PollReport`].
    #[tracing::instrument(name = "scheduler.poll", skip(self))]
    pub async fn poll_once(&self) -> Result<PollReport, DomainError> {
        let now = self.inner.clock.now();
        let limit = i64::try_from(self.inner.config.batch_size).unwrap_or(i64::MAX);
        let due = find_due(self.inner.uow.pool(), now, limit).await?;

        let mut report = PollReport::default();
        if due.is_empty() {
            tracing::debug!("no schedules due");
            return Ok(report);
        }

        let attempts = join_all(due.iter().map(|view| self.attempt(view))).await;
        for attempt in attempts {
            match attempt {
                Attempt::Executed => report.executed += 1,
                Attempt::Retried => report.retried += 1,
                Attempt::Failed => report.failed += 1,
                Attempt::Skipped => {}
            }
        }
        tracing::debug!(
            due = due.len(),
            executed = report.executed,
            retried = report.retried,
            failed = report.failed,
            "poll complete"
        );
        Ok(report)
    }

    async fn attempt(&self, view: &ScheduleView) -> Attempt {
        let schedule_id = view.schedule_id;
        let Some(handler) = self.inner.registry.get(&view.command_type) else {
            return self.fail_unhandled(view).await;
        };

        let clock = Arc::clone(&self.inner.clock);
        let data = view.command_data.clone();
        let started = std::time::Instant::now();
        let result = self
            .inner
            .uow
            .with_transaction(|repos| async move {
                let mut schedule: Schedule = repos.load_aggregate(schedule_id).await?;
                if !schedule.is_due(clock.now()) {
                    return Ok(false);
                }
                let context = CommandContext {
                    correlation_id: schedule.state().correlation_id,
                    user_id: SCHEDULER_USER.to_owned(),
                };
                handler.handle_json(&repos, data, &context).await?;
                schedule.mark_executed(clock.as_ref())?;
                repos.save_aggregate(&mut schedule)?;
                Ok(true)
            })
            .await;

        match result {
            Ok(true) => {
                tracing::info!(
                    %schedule_id,
                    command_type = %view.command_type,
                    elapsed_ms = started.elapsed().as_millis(),
                    "schedule executed"
                );
                Attempt::Executed
            }
            Ok(false) => {
                tracing::debug!(%schedule_id, "schedule no longer due, skipping");
                Attempt::Skipped
            }
            Err(e) => self.record_failure(view, &e).await,
        }
    }

    async fn record_failure(&self, view: &ScheduleView, error: &DomainError) -> Attempt {
        let schedule_id = view.schedule_id;
        let clock = Arc::clone(&self.inner.clock);
        let message = error.to_string();
        let max_retries = self.inner.config.max_retries;
        let policy = self.inner.config.retry_policy;

        let recorded = self
            .inner
            .uow
            .with_transaction(|repos| async move {
                let mut schedule: Schedule = repos.load_aggregate(schedule_id).await?;
                let outcome = schedule.record_failure(&message, max_retries, &policy, clock.as_ref())?;
                repos.save_aggregate(&mut schedule)?;
                Ok((outcome, schedule.state().retry_count))
            })
            .await;

        match recorded {
            Ok((FailureOutcome::Retrying { next_retry_at }, retry_count)) => {
                tracing::warn!(
                    %schedule_id,
                    command_type = %view.command_type,
                    retry_count,
                    %next_retry_at,
                    error = %error,
                    "schedule failed, retrying"
                );
                Attempt::Retried
            }
            Ok((FailureOutcome::Exhausted, retry_count)) => {
                tracing::error!(
                    %schedule_id,
                    command_type = %view.command_type,
                    retry_count,
                    error = %error,
                    "schedule failed, retries exhausted"
                );
                Attempt::Failed
            }
            Err(e) => {
                tracing::error!(
                    %schedule_id,
                    error = %error,
                    record_error = %e,
                    "could not record schedule failure"
                );
                Attempt::Skipped
            }
        }
    }

    async fn fail_unhandled(&self, view: &ScheduleView) -> Attempt {
        let schedule_id = view.schedule_id;
        let clock = Arc::clone(&self.inner.clock);
        let message = format!("no handler registered for command type {}", view.command_type);
        let log_message = message.clone();

        let recorded = self
            .inner
            .uow
            .with_transaction(|repos| async move {
                let mut schedule: Schedule = repos.load_aggregate(schedule_id).await?;
                schedule.fail_unhandled(&message, clock.as_ref())?;
                repos.save_aggregate(&mut schedule)?;
                Ok(())
            })
            .await;

        match recorded {
            Ok(()) => {
                tracing::error!(%schedule_id, error = %log_message, "schedule failed");
                Attempt::Failed
            }
            Err(e) => {
                tracing::error!(%schedule_id, error = %e, "could not fail unhandled schedule");
                Attempt::Skipped
            }
        }
    }

    /// Spawns the polling loop.
    #[must_use]
    pub fn start(&self) -> PollerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = self.clone();
        let task = tokio::spawn(async move { poller.run(shutdown_rx).await });
        tracing::info!(
            poll_interval_ms = self.inner.config.poll_interval.as_millis(),
            batch_size = self.inner.config.batch_size,
            max_retries = self.inner.config.max_retries,
            handlers = self.inner.registry.len(),
            "schedule poller started"
        );
        PollerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            if let Err(e) = self.poll_once().await {
                tracing::error!(error = %e, "schedule poll failed");
            }
        }
        tracing::info!("schedule poller stopped");
    }
}

/// Handle to a running polling loop.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stops the loop. A tick already in progress finishes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "schedule poller task failed");
        }
    }
}
