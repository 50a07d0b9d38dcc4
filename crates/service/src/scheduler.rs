//! Daily fan-out of per-user summaries
//!
//! On every cron fire the scheduler enumerates the users that own expenses,
//! dispatches one validate-then-summarize chain per user through the
//! orchestrator, and folds the outcomes into a [`BatchRun`]. A failing user is
//! recorded and never stops the run. Only a failure to enumerate users aborts
//! it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use cron::Schedule;
use expense_core::{DateRange, ErrorKind, ExpenseSummary};
use expense_executor::AsyncResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{ConfigError, ReportScheduleConfig};
use crate::orchestrator::ExpenseOrchestrator;

/// Where the scheduler is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    Triggered,
    FanningOut,
    Aggregating,
    Completed,
    Aborted,
}

/// Result for one user in a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserOutcome {
    Success(ExpenseSummary),
    Failure(ErrorKind),
}

impl UserOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    CompletedWithFailures,
    Aborted,
}

/// Record of one execution of the daily report job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRun {
    pub id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub window: DateRange,
    pub outcomes: BTreeMap<i64, UserOutcome>,
    pub status: BatchStatus,
    pub finished_at: DateTime<Utc>,
}

impl BatchRun {
    pub fn successes(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }
}

/// Cron-driven batch report job
pub struct BatchReportScheduler {
    orchestrator: ExpenseOrchestrator,
    config: ReportScheduleConfig,
    schedule: Schedule,
    phase: watch::Sender<SchedulerPhase>,
    last_run: Mutex<Option<BatchRun>>,
    // Serializes runs so two fan-in steps never overlap
    run_lock: tokio::sync::Mutex<()>,
}

impl BatchReportScheduler {
    pub fn new(
        orchestrator: ExpenseOrchestrator,
        config: ReportScheduleConfig,
    ) -> Result<Self, ConfigError> {
        let schedule = config.schedule()?;
        let (phase, _) = watch::channel(SchedulerPhase::Idle);
        Ok(Self {
            orchestrator,
            config,
            schedule,
            phase,
            last_run: Mutex::new(None),
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ReportScheduleConfig {
        &self.config
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    /// The most recently emitted run
    pub fn last_run(&self) -> Option<BatchRun> {
        self.last_run.lock().clone()
    }

    /// Next fire strictly after `now`
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&self.config.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// The reporting window for a trigger: the previous calendar day in the
    /// configured timezone
    pub fn window_for(&self, trigger_time: DateTime<Utc>) -> DateRange {
        let today = trigger_time.with_timezone(&self.config.timezone).date_naive();
        DateRange::single_day(today.pred_opt().unwrap_or(NaiveDate::MIN))
    }

    /// Run the job once for `trigger_time`
    #[instrument(skip(self), fields(batch_id))]
    pub async fn run_once(&self, trigger_time: DateTime<Utc>) -> BatchRun {
        let _running = self.run_lock.lock().await;
        let id = Uuid::now_v7();
        tracing::Span::current().record("batch_id", tracing::field::display(id));

        self.set_phase(SchedulerPhase::Triggered);
        // One deadline bounds dispatch and collection together
        let deadline = Instant::now() + self.config.run_timeout;
        let window = self.window_for(trigger_time);
        info!(window_start = %window.start, window_end = %window.end, "Daily report batch triggered");

        let user_ids = match self.orchestrator.active_user_ids().await.wait().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Could not enumerate users, aborting batch");
                self.set_phase(SchedulerPhase::Aborted);
                return self.emit(BatchRun {
                    id,
                    triggered_at: trigger_time,
                    window,
                    outcomes: BTreeMap::new(),
                    status: BatchStatus::Aborted,
                    finished_at: Utc::now(),
                });
            }
        };

        self.set_phase(SchedulerPhase::FanningOut);
        let pending = self.fan_out(&user_ids, window, deadline).await;

        self.set_phase(SchedulerPhase::Aggregating);
        let outcomes = self.aggregate(&user_ids, &pending, deadline).await;

        let status = if outcomes.values().all(UserOutcome::is_success) {
            BatchStatus::Completed
        } else {
            BatchStatus::CompletedWithFailures
        };
        let run = BatchRun {
            id,
            triggered_at: trigger_time,
            window,
            outcomes,
            status,
            finished_at: Utc::now(),
        };
        info!(
            users = run.outcomes.len(),
            succeeded = run.successes(),
            failed = run.failures(),
            status = ?run.status,
            "Daily report batch finished"
        );
        self.set_phase(SchedulerPhase::Completed);
        self.emit(run)
    }

    /// Dispatch one chain per user until the deadline
    ///
    /// A saturated pool runs submissions on this task, so dispatch itself can
    /// stall. The returned results cover a prefix of `user_ids`; users past
    /// it were never dispatched.
    async fn fan_out(
        &self,
        user_ids: &[i64],
        window: DateRange,
        deadline: Instant,
    ) -> Vec<AsyncResult<ExpenseSummary>> {
        let mut pending = Vec::with_capacity(user_ids.len());
        let dispatch = async {
            for &user_id in user_ids {
                pending.push(self.orchestrator.daily_summary(user_id, window).await);
            }
        };
        if tokio::time::timeout_at(deadline, dispatch).await.is_err() {
            warn!(
                dispatched = pending.len(),
                users = user_ids.len(),
                "Batch run timed out while dispatching"
            );
        } else {
            debug!(users = user_ids.len(), "Dispatched per-user summaries");
        }
        pending
    }

    /// Wait for every result up to the deadline; anything still pending
    /// afterwards, or never dispatched, counts as aborted
    async fn aggregate(
        &self,
        user_ids: &[i64],
        pending: &[AsyncResult<ExpenseSummary>],
        deadline: Instant,
    ) -> BTreeMap<i64, UserOutcome> {
        let joined = AsyncResult::join_all(pending.to_vec());
        if tokio::time::timeout_at(deadline, joined.wait()).await.is_err() {
            warn!(
                timeout_secs = self.config.run_timeout.as_secs(),
                "Batch run timed out, recording unfinished users as aborted"
            );
        }

        user_ids
            .iter()
            .enumerate()
            .map(|(i, &user_id)| {
                let outcome = match pending.get(i).and_then(AsyncResult::try_get) {
                    Some(Ok(summary)) => UserOutcome::Success(summary),
                    Some(Err(e)) => {
                        warn!(user_id, error = %e, "Daily summary failed");
                        UserOutcome::Failure(e.kind())
                    }
                    None => UserOutcome::Failure(ErrorKind::Aborted),
                };
                (user_id, outcome)
            })
            .collect()
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        self.phase.send_replace(phase);
    }

    fn emit(&self, run: BatchRun) -> BatchRun {
        *self.last_run.lock() = Some(run.clone());
        run
    }

    /// Run on the cron schedule until `shutdown` flips to `true`
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                cron = %self.config.cron,
                timezone = %self.config.timezone,
                "Report scheduler started"
            );

            let mut last_fire: Option<DateTime<Utc>> = None;
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let now = Utc::now();
                // Never fire the same slot twice if the clock lags the timer
                let from = last_fire.map_or(now, |last| last.max(now));
                let Some(next) = self.next_fire_after(from) else {
                    warn!("Report schedule has no upcoming fire time, stopping");
                    break;
                };
                let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
                debug!(next_fire = %next, "Waiting for next report batch");
                self.set_phase(SchedulerPhase::Idle);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        last_fire = Some(next);
                        self.run_once(next).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            info!("Report scheduler stopped");
        })
    }
}
