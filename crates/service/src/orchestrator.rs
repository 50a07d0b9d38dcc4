//! Expense operations composed over the worker pools
//!
//! Every operation validates its input on the caller first and returns a
//! failed [`AsyncResult`] without touching a pool when the input is bad.
//! Remote user validation runs on the external pool, persistence on the
//! general pool, and report aggregation on the heavy pool. Dependent steps
//! are chained, never awaited from inside another pool's worker.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use expense_core::report::{build_report, summarize};
use expense_core::validation::{validate_bulk, validate_expense_id, validate_single};
use expense_core::{
    DateRange, Expense, ExpenseReport, ExpenseRequest, ExpenseSummary, ReportKind, TaskError,
    UserRecord,
};
use expense_executor::{AsyncResult, WorkerPools};
use expense_storage::{ExpenseRepository, StoreError};
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::{ExternalCallOutcome, UserValidationAdapter};
use crate::sync::{BestEffortSink, ReconciliationSync};

/// Composes validation, remote user checks, persistence and reporting
#[derive(Clone)]
pub struct ExpenseOrchestrator {
    pools: WorkerPools,
    repository: Arc<dyn ExpenseRepository>,
    users: UserValidationAdapter,
    sync: Arc<dyn ReconciliationSync>,
    sync_sink: BestEffortSink,
}

impl ExpenseOrchestrator {
    pub fn new(
        pools: WorkerPools,
        repository: Arc<dyn ExpenseRepository>,
        users: UserValidationAdapter,
        sync: Arc<dyn ReconciliationSync>,
    ) -> Self {
        Self {
            pools,
            repository,
            users,
            sync,
            sync_sink: BestEffortSink::new(),
        }
    }

    pub fn pools(&self) -> &WorkerPools {
        &self.pools
    }

    /// Observed outcomes of best-effort sync tasks
    pub fn sync_sink(&self) -> &BestEffortSink {
        &self.sync_sink
    }

    // ============================================
    // Writes
    // ============================================

    /// Validate, check the user remotely, then persist
    ///
    /// A best-effort sync is dispatched after a successful write; its outcome
    /// never reaches the returned result.
    #[instrument(skip(self, request))]
    pub async fn create_expense(&self, request: ExpenseRequest, user_id: i64) -> AsyncResult<Expense> {
        let draft = match validate_single(&request, user_id) {
            Ok(draft) => draft,
            Err(err) => {
                debug!(error = %err, "Rejected expense before dispatch");
                return AsyncResult::failed(err);
            }
        };

        let repository = Arc::clone(&self.repository);
        let saved = self
            .require_user(user_id)
            .await
            .and_then(self.pools.general(), move |_user| async move {
                let expense = repository.save(draft).await.map_err(|e| {
                    error!(user_id, error = %e, "Failed to save expense");
                    TaskError::from(e)
                })?;
                info!(user_id, expense_id = expense.id, "Created expense");
                Ok(expense)
            });

        self.sync_after(&saved, user_id);
        saved
    }

    /// Create several expenses behind one user check
    ///
    /// Every item is validated; if any fails, the indexed violations are
    /// returned and nothing is written.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn create_expenses(
        &self,
        requests: Vec<ExpenseRequest>,
        user_id: i64,
    ) -> AsyncResult<Vec<Expense>> {
        let drafts = match validate_bulk(&requests, user_id) {
            Ok(drafts) => drafts,
            Err(err) => {
                debug!(violations = err.violations().len(), "Rejected bulk create before dispatch");
                return AsyncResult::failed(err);
            }
        };

        let repository = Arc::clone(&self.repository);
        let saved = self
            .require_user(user_id)
            .await
            .and_then(self.pools.general(), move |_user| async move {
                let expenses = repository.save_all(drafts).await.map_err(|e| {
                    error!(user_id, error = %e, "Failed to save expenses");
                    TaskError::from(e)
                })?;
                info!(user_id, count = expenses.len(), "Created expenses");
                Ok(expenses)
            });

        self.sync_after(&saved, user_id);
        saved
    }

    /// Replace an expense owned by `user_id`
    ///
    /// Completes with `None` when no such expense belongs to the user.
    #[instrument(skip(self, request))]
    pub async fn update_expense(
        &self,
        id: i64,
        request: ExpenseRequest,
        user_id: i64,
    ) -> AsyncResult<Option<Expense>> {
        let draft = match validate_expense_id(id).and_then(|_| validate_single(&request, user_id)) {
            Ok(draft) => draft.with_id(id),
            Err(err) => return AsyncResult::failed(err),
        };

        let repository = Arc::clone(&self.repository);
        self.pools
            .general()
            .submit(move || async move {
                if repository.find_by_id_and_user(id, user_id).await?.is_none() {
                    warn!(user_id, expense_id = id, "Expense not found for update");
                    return Ok(None);
                }

                match repository.save(draft).await {
                    Ok(expense) => {
                        info!(user_id, expense_id = id, "Updated expense");
                        Ok(Some(expense))
                    }
                    // Deleted between the ownership check and the write
                    Err(StoreError::NotFound(_)) => Ok(None),
                    Err(e) => {
                        error!(user_id, expense_id = id, error = %e, "Failed to update expense");
                        Err(e.into())
                    }
                }
            })
            .await
    }

    /// Delete an expense owned by `user_id`; `false` if there was none
    #[instrument(skip(self))]
    pub async fn delete_expense(&self, id: i64, user_id: i64) -> AsyncResult<bool> {
        if let Err(err) = validate_expense_id(id) {
            return AsyncResult::failed(err);
        }

        let repository = Arc::clone(&self.repository);
        self.pools
            .general()
            .submit(move || async move {
                if repository.find_by_id_and_user(id, user_id).await?.is_none() {
                    warn!(user_id, expense_id = id, "Expense not found for delete");
                    return Ok(false);
                }

                let deleted = repository.delete_by_id(id).await.map_err(|e| {
                    error!(user_id, expense_id = id, error = %e, "Failed to delete expense");
                    TaskError::from(e)
                })?;
                info!(user_id, expense_id = id, "Deleted expense");
                Ok(deleted)
            })
            .await
    }

    // ============================================
    // Reads
    // ============================================

    /// All expenses of a user, newest first
    pub async fn get_all_expenses(&self, user_id: i64) -> AsyncResult<Vec<Expense>> {
        let repository = Arc::clone(&self.repository);
        self.pools
            .general()
            .submit(move || async move {
                let expenses = repository.find_by_user_ordered_by_date_desc(user_id).await?;
                debug!(user_id, count = expenses.len(), "Fetched expenses");
                Ok(expenses)
            })
            .await
    }

    pub async fn get_expense_by_id(&self, id: i64, user_id: i64) -> AsyncResult<Option<Expense>> {
        if let Err(err) = validate_expense_id(id) {
            return AsyncResult::failed(err);
        }

        let repository = Arc::clone(&self.repository);
        self.pools
            .general()
            .submit(move || async move {
                let expense = repository.find_by_id_and_user(id, user_id).await?;
                if expense.is_none() {
                    warn!(user_id, expense_id = id, "Expense not found");
                }
                Ok(expense)
            })
            .await
    }

    /// Expenses with `start <= date <= end`, newest first
    pub async fn get_expenses_by_date_range(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AsyncResult<Vec<Expense>> {
        let range = match date_range(start, end) {
            Ok(range) => range,
            Err(err) => return AsyncResult::failed(err),
        };

        let repository = Arc::clone(&self.repository);
        self.pools
            .general()
            .submit(move || async move {
                Ok(repository
                    .find_by_user_and_date_between(user_id, range.start, range.end)
                    .await?)
            })
            .await
    }

    // ============================================
    // Reports
    // ============================================

    /// Totals for one user over an inclusive date range
    #[instrument(skip(self))]
    pub async fn generate_summary(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AsyncResult<ExpenseSummary> {
        match date_range(start, end) {
            Ok(range) => self.summarize_on_heavy(user_id, range).await,
            Err(err) => AsyncResult::failed(err),
        }
    }

    #[instrument(skip(self))]
    pub async fn generate_monthly_report(
        &self,
        user_id: i64,
        year: i32,
        month: u32,
    ) -> AsyncResult<ExpenseReport> {
        match DateRange::month(year, month) {
            Some(range) => self.report_on_heavy(user_id, range, ReportKind::Monthly).await,
            None => AsyncResult::failed(TaskError::validation(format!(
                "invalid month: {year}-{month:02}"
            ))),
        }
    }

    #[instrument(skip(self))]
    pub async fn generate_category_report(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> AsyncResult<ExpenseReport> {
        match date_range(start, end) {
            Ok(range) => self.report_on_heavy(user_id, range, ReportKind::Category).await,
            Err(err) => AsyncResult::failed(err),
        }
    }

    /// Users that own at least one expense, ascending
    pub async fn active_user_ids(&self) -> AsyncResult<Vec<i64>> {
        let repository = Arc::clone(&self.repository);
        self.pools
            .general()
            .submit(move || async move {
                repository.find_distinct_user_ids().await.map_err(|e| {
                    error!(error = %e, "Failed to enumerate users");
                    TaskError::from(e)
                })
            })
            .await
    }

    /// Per-user step of the daily batch: confirm the user, then summarize
    ///
    /// A missing user or a user-service failure fails this user's result.
    pub async fn daily_summary(&self, user_id: i64, range: DateRange) -> AsyncResult<ExpenseSummary> {
        let repository = Arc::clone(&self.repository);
        self.require_user(user_id)
            .await
            .and_then(self.pools.heavy(), move |_user| async move {
                summary_task(repository, user_id, range).await
            })
    }

    /// Look a user up by name in the user service
    pub async fn validate_user_by_username(&self, username: &str) -> AsyncResult<ExternalCallOutcome> {
        self.users.validate_username(username).await
    }

    // ============================================
    // Internals
    // ============================================

    async fn require_user(&self, user_id: i64) -> AsyncResult<UserRecord> {
        self.users
            .validate_user(user_id)
            .await
            .map(move |outcome: ExternalCallOutcome| {
                let user = outcome.into_user(user_id);
                if let Err(err) = &user {
                    warn!(user_id, error = %err, "User validation failed");
                }
                user
            })
    }

    async fn summarize_on_heavy(&self, user_id: i64, range: DateRange) -> AsyncResult<ExpenseSummary> {
        let repository = Arc::clone(&self.repository);
        self.pools
            .heavy()
            .submit(move || summary_task(repository, user_id, range))
            .await
    }

    async fn report_on_heavy(
        &self,
        user_id: i64,
        range: DateRange,
        kind: ReportKind,
    ) -> AsyncResult<ExpenseReport> {
        let repository = Arc::clone(&self.repository);
        self.pools
            .heavy()
            .submit(move || async move {
                let expenses = repository
                    .find_by_user_and_date_between(user_id, range.start, range.end)
                    .await
                    .map_err(|e| {
                        error!(user_id, error = %e, "Failed to load expenses for report");
                        TaskError::from(e)
                    })?;
                let report = build_report(expenses, range, kind, Utc::now());
                info!(
                    user_id,
                    report = %kind,
                    transactions = report.total_transactions,
                    "Generated report"
                );
                Ok(report)
            })
            .await
    }

    /// Dispatch the best-effort sync once `saved` succeeds
    fn sync_after<T>(&self, saved: &AsyncResult<T>, user_id: i64)
    where
        T: Clone + Send + Sync + 'static,
    {
        let saved = saved.clone();
        let pool = self.pools.external().clone();
        let sync = Arc::clone(&self.sync);
        let sink = self.sync_sink.clone();

        tokio::spawn(async move {
            if saved.wait().await.is_err() {
                return;
            }
            let synced = pool
                .submit(move || async move { sync.sync_user(user_id).await })
                .await;
            sink.observe(user_id, &synced);
        });
    }
}

async fn summary_task(
    repository: Arc<dyn ExpenseRepository>,
    user_id: i64,
    range: DateRange,
) -> Result<ExpenseSummary, TaskError> {
    let expenses = repository
        .find_by_user_and_date_between(user_id, range.start, range.end)
        .await
        .map_err(|e| {
            error!(user_id, error = %e, "Failed to load expenses for summary");
            TaskError::from(e)
        })?;
    let summary = summarize(&expenses, user_id, range, Utc::now());
    info!(
        user_id,
        total = summary.total_amount,
        count = summary.total_transactions,
        "Generated expense summary"
    );
    Ok(summary)
}

fn date_range(start: NaiveDate, end: NaiveDate) -> Result<DateRange, TaskError> {
    DateRange::new(start, end)
        .ok_or_else(|| TaskError::validation(format!("start date {start} is after end date {end}")))
}
