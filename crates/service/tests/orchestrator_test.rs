//! Orchestrator behaviour over in-process collaborators
//!
//! Run with: cargo test -p expense-service --test orchestrator_test

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use expense_core::{ErrorKind, ExpenseDraft, ExpenseRequest, TaskError, UserRecord};
use expense_executor::{WorkerPools, WorkerPoolsConfig};
use expense_service::{
    DirectoryError, ExpenseOrchestrator, ExternalCallOutcome, ReconciliationSync,
    UserDirectory, UserValidationAdapter,
};
use expense_storage::{ExpenseRepository, InMemoryExpenseRepository};

// ============================================
// Collaborator doubles
// ============================================

/// Every id is found unless scripted otherwise
#[derive(Default)]
struct ScriptedDirectory {
    failures: HashMap<i64, DirectoryError>,
    calls: AtomicUsize,
}

impl ScriptedDirectory {
    fn failing(mut self, user_id: i64, error: DirectoryError) -> Self {
        self.failures.insert(user_id, error);
        self
    }
}

#[async_trait]
impl UserDirectory for ScriptedDirectory {
    async fn get_user_by_id(&self, user_id: i64) -> Result<UserRecord, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.get(&user_id) {
            Some(err) => Err(err.clone()),
            None => Ok(UserRecord::new(user_id)),
        }
    }

    async fn get_user_by_username(&self, username: &str) -> Result<UserRecord, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match username {
            "alice" => Ok(UserRecord::new(1).with_username("alice")),
            _ => Err(DirectoryError::Status {
                status: 404,
                body: String::new(),
            }),
        }
    }
}

struct CountingSync {
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl ReconciliationSync for CountingSync {
    async fn sync_user(&self, _user_id: i64) -> Result<(), TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TaskError::external("reconciliation-sync", "connection refused", true));
        }
        Ok(())
    }
}

struct Harness {
    orchestrator: ExpenseOrchestrator,
    repository: Arc<InMemoryExpenseRepository>,
    directory: Arc<ScriptedDirectory>,
    sync: Arc<CountingSync>,
    pools: WorkerPools,
}

fn harness_with(directory: ScriptedDirectory, sync_fails: bool) -> Harness {
    let pools = WorkerPools::new(WorkerPoolsConfig::default()).unwrap();
    let repository = Arc::new(InMemoryExpenseRepository::new());
    let directory = Arc::new(directory);
    let sync = Arc::new(CountingSync {
        fail: sync_fails,
        calls: AtomicUsize::new(0),
    });

    let users = UserValidationAdapter::new(directory.clone(), pools.external().clone());
    let orchestrator = ExpenseOrchestrator::new(
        pools.clone(),
        repository.clone(),
        users,
        sync.clone(),
    );

    Harness {
        orchestrator,
        repository,
        directory,
        sync,
        pools,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedDirectory::default(), false)
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn request(amount: f64) -> ExpenseRequest {
    ExpenseRequest::new(amount, "Food", "Card").with_date(date(2024, 3, 10))
}

fn draft(user_id: i64, day: NaiveDate, amount: f64, category: &str) -> ExpenseDraft {
    ExpenseDraft {
        id: None,
        user_id,
        expense_type: 1,
        date: day,
        amount,
        category: category.to_string(),
        account: "Card".to_string(),
        note: None,
    }
}

fn total_submitted(pools: &WorkerPools) -> u64 {
    pools.stats().iter().map(|(_, s)| s.submitted).sum()
}

// ============================================
// Create
// ============================================

#[test_log::test(tokio::test)]
async fn test_invalid_request_dispatches_nothing() {
    let h = harness();
    let invalid = vec![
        request(0.0),
        request(-3.0),
        ExpenseRequest::new(5.0, "", "Card").with_date(date(2024, 1, 1)),
        ExpenseRequest::new(5.0, "Food", "  ").with_date(date(2024, 1, 1)),
        ExpenseRequest::new(5.0, "Food", "Card"),
    ];

    for req in invalid {
        let result = h.orchestrator.create_expense(req, 1).await;
        let err = result.try_get().expect("failed immediately").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    assert_eq!(total_submitted(&h.pools), 0);
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 0);
    assert!(h.repository.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_create_persists_and_syncs() {
    let h = harness();

    let expense = h
        .orchestrator
        .create_expense(request(12.5).with_note("lunch"), 7)
        .await
        .wait()
        .await
        .unwrap();

    assert!(expense.id > 0);
    assert_eq!(expense.user_id, 7);
    assert_eq!(expense.note.as_deref(), Some("lunch"));
    assert_eq!(h.repository.len(), 1);

    h.orchestrator.sync_sink().wait_for(1).await;
    let records = h.orchestrator.sync_sink().records();
    assert_eq!(records[0].user_id, 7);
    assert!(records[0].outcome.is_ok());
    assert_eq!(h.sync.calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn test_unknown_user_is_not_found_without_write() {
    let h = harness_with(
        ScriptedDirectory::default().failing(
            404,
            DirectoryError::Status {
                status: 404,
                body: "no such user".into(),
            },
        ),
        false,
    );

    let err = h
        .orchestrator
        .create_expense(request(10.0), 404)
        .await
        .wait()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.repository.write_count(), 0);
    assert_eq!(h.pools.general().stats().submitted, 0);
    assert_eq!(h.sync.calls.load(Ordering::SeqCst), 0);
}

#[test_log::test(tokio::test)]
async fn test_user_service_failure_is_external_error() {
    let h = harness_with(
        ScriptedDirectory::default().failing(
            3,
            DirectoryError::Status {
                status: 503,
                body: "unavailable".into(),
            },
        ),
        false,
    );

    let err = h
        .orchestrator
        .create_expense(request(10.0), 3)
        .await
        .wait()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExternalService);
    assert!(err.is_retriable());
    assert!(h.repository.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_storage_failure_is_data_access_error() {
    let h = harness();
    h.repository.fail_with("disk full");

    let err = h
        .orchestrator
        .create_expense(request(10.0), 1)
        .await
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataAccess);
}

#[test_log::test(tokio::test)]
async fn test_sync_failure_does_not_reach_caller() {
    let h = harness_with(ScriptedDirectory::default(), true);

    let result = h.orchestrator.create_expense(request(8.0), 2).await;
    let expense = result.wait().await.unwrap();
    assert_eq!(h.repository.len(), 1);

    h.orchestrator.sync_sink().wait_for(1).await;
    assert_eq!(h.orchestrator.sync_sink().failures(), 1);
    // The caller's result is untouched by the failed sync
    assert_eq!(result.try_get(), Some(Ok(expense)));
}

// ============================================
// Bulk create
// ============================================

#[test_log::test(tokio::test)]
async fn test_bulk_with_one_invalid_item_writes_nothing() {
    let h = harness();
    let requests = vec![request(1.0), request(2.0), request(-4.0), request(3.0)];

    let err = h
        .orchestrator
        .create_expenses(requests, 1)
        .await
        .wait()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.violations().len(), 1);
    assert_eq!(err.violations()[0].index, Some(2));
    assert!(h.repository.is_empty());
    assert_eq!(total_submitted(&h.pools), 0);
}

#[test_log::test(tokio::test)]
async fn test_bulk_checks_user_once_and_writes_all() {
    let h = harness();
    let requests = vec![request(1.0), request(2.0), request(3.0)];

    let saved = h
        .orchestrator
        .create_expenses(requests, 5)
        .await
        .wait()
        .await
        .unwrap();

    assert_eq!(saved.len(), 3);
    assert!(saved.iter().all(|e| e.user_id == 5));
    assert_eq!(h.repository.len(), 3);
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 1);

    h.orchestrator.sync_sink().wait_for(1).await;
    assert_eq!(h.sync.calls.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn test_empty_bulk_is_rejected() {
    let h = harness();
    let err = h
        .orchestrator
        .create_expenses(Vec::new(), 1)
        .await
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// ============================================
// Update / delete / read
// ============================================

#[test_log::test(tokio::test)]
async fn test_update_and_delete_require_ownership() {
    let h = harness();
    let owned = h
        .repository
        .save(draft(1, date(2024, 3, 1), 10.0, "Food"))
        .await
        .unwrap();

    let foreign_update = h
        .orchestrator
        .update_expense(owned.id, request(99.0), 2)
        .await
        .wait()
        .await
        .unwrap();
    assert!(foreign_update.is_none());

    let foreign_delete = h
        .orchestrator
        .delete_expense(owned.id, 2)
        .await
        .wait()
        .await
        .unwrap();
    assert!(!foreign_delete);
    assert_eq!(h.repository.len(), 1);

    let updated = h
        .orchestrator
        .update_expense(owned.id, request(99.0), 1)
        .await
        .wait()
        .await
        .unwrap()
        .expect("owner can update");
    assert_eq!(updated.id, owned.id);
    assert_eq!(updated.amount, 99.0);

    let deleted = h
        .orchestrator
        .delete_expense(owned.id, 1)
        .await
        .wait()
        .await
        .unwrap();
    assert!(deleted);
    assert!(h.repository.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_missing_row_is_a_normal_outcome() {
    let h = harness();

    let updated = h
        .orchestrator
        .update_expense(42, request(1.0), 1)
        .await
        .wait()
        .await
        .unwrap();
    assert!(updated.is_none());

    let fetched = h
        .orchestrator
        .get_expense_by_id(42, 1)
        .await
        .wait()
        .await
        .unwrap();
    assert!(fetched.is_none());
}

#[test_log::test(tokio::test)]
async fn test_non_positive_ids_fail_before_dispatch() {
    let h = harness();

    for id in [0, -1] {
        let get = h.orchestrator.get_expense_by_id(id, 1).await;
        assert_eq!(get.try_get().unwrap().unwrap_err().kind(), ErrorKind::Validation);

        let delete = h.orchestrator.delete_expense(id, 1).await;
        assert_eq!(delete.try_get().unwrap().unwrap_err().kind(), ErrorKind::Validation);

        let update = h.orchestrator.update_expense(id, request(1.0), 1).await;
        assert_eq!(update.try_get().unwrap().unwrap_err().kind(), ErrorKind::Validation);
    }
    assert_eq!(total_submitted(&h.pools), 0);
}

#[test_log::test(tokio::test)]
async fn test_listing_and_date_range() {
    let h = harness();
    for day in [1, 15, 28] {
        h.repository
            .save(draft(1, date(2024, 2, day), 5.0, "Food"))
            .await
            .unwrap();
    }
    h.repository
        .save(draft(2, date(2024, 2, 15), 5.0, "Food"))
        .await
        .unwrap();

    let all = h.orchestrator.get_all_expenses(1).await.wait().await.unwrap();
    let days: Vec<NaiveDate> = all.iter().map(|e| e.date).collect();
    assert_eq!(days, vec![date(2024, 2, 28), date(2024, 2, 15), date(2024, 2, 1)]);

    let ranged = h
        .orchestrator
        .get_expenses_by_date_range(1, date(2024, 2, 10), date(2024, 2, 28))
        .await
        .wait()
        .await
        .unwrap();
    assert_eq!(ranged.len(), 2);

    let reversed = h
        .orchestrator
        .get_expenses_by_date_range(1, date(2024, 2, 28), date(2024, 2, 1))
        .await;
    assert_eq!(
        reversed.try_get().unwrap().unwrap_err().kind(),
        ErrorKind::Validation
    );
}

// ============================================
// Reports
// ============================================

#[test_log::test(tokio::test)]
async fn test_summary_is_stable_across_calls() {
    let h = harness();
    for (day, amount) in [(1, 10.0), (2, 20.0), (3, 5.5)] {
        h.repository
            .save(draft(1, date(2024, 4, day), amount, "Food"))
            .await
            .unwrap();
    }

    let first = h
        .orchestrator
        .generate_summary(1, date(2024, 4, 1), date(2024, 4, 30))
        .await
        .wait()
        .await
        .unwrap();
    let second = h
        .orchestrator
        .generate_summary(1, date(2024, 4, 1), date(2024, 4, 30))
        .await
        .wait()
        .await
        .unwrap();

    assert_eq!(first.total_amount, 35.5);
    assert_eq!(first.total_transactions, 3);
    assert_eq!(first.total_amount, second.total_amount);
    assert_eq!(first.total_transactions, second.total_transactions);
    assert_eq!(h.pools.heavy().stats().submitted, 2);
    assert_eq!(h.directory.calls.load(Ordering::SeqCst), 0);
}

#[test_log::test(tokio::test)]
async fn test_monthly_and_category_reports() {
    let h = harness();
    h.repository
        .save(draft(1, date(2024, 5, 2), 10.0, "Travel"))
        .await
        .unwrap();
    h.repository
        .save(draft(1, date(2024, 5, 20), 4.0, "Food"))
        .await
        .unwrap();
    h.repository
        .save(draft(1, date(2024, 5, 21), 6.0, "Food"))
        .await
        .unwrap();
    h.repository
        .save(draft(1, date(2024, 6, 1), 100.0, "Food"))
        .await
        .unwrap();

    let monthly = h
        .orchestrator
        .generate_monthly_report(1, 2024, 5)
        .await
        .wait()
        .await
        .unwrap();
    assert_eq!(monthly.report_type, "Monthly Report");
    assert_eq!(monthly.start_date, date(2024, 5, 1));
    assert_eq!(monthly.end_date, date(2024, 5, 31));
    assert_eq!(monthly.total_transactions, 3);
    assert_eq!(monthly.total_amount, 20.0);

    let category = h
        .orchestrator
        .generate_category_report(1, date(2024, 5, 1), date(2024, 6, 30))
        .await
        .wait()
        .await
        .unwrap();
    let categories: Vec<(&str, f64)> = category
        .by_category
        .iter()
        .map(|(k, v)| (k.as_str(), *v))
        .collect();
    assert_eq!(categories, vec![("Food", 110.0), ("Travel", 10.0)]);

    let invalid = h.orchestrator.generate_monthly_report(1, 2024, 13).await;
    assert_eq!(
        invalid.try_get().unwrap().unwrap_err().kind(),
        ErrorKind::Validation
    );
}

#[test_log::test(tokio::test)]
async fn test_validate_user_by_username() {
    let h = harness();

    let found = h
        .orchestrator
        .validate_user_by_username("alice")
        .await
        .wait()
        .await
        .unwrap();
    assert_eq!(
        found,
        ExternalCallOutcome::Found(UserRecord::new(1).with_username("alice"))
    );

    let missing = h
        .orchestrator
        .validate_user_by_username("mallory")
        .await
        .wait()
        .await
        .unwrap();
    assert_eq!(missing, ExternalCallOutcome::NotFound);
}
