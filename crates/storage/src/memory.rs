//! In-memory implementation of ExpenseRepository

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use expense_core::{Expense, ExpenseDraft};
use parking_lot::RwLock;

use super::store::{ExpenseRepository, StoreError};

/// In-memory implementation of ExpenseRepository
///
/// Used by tests and by the binary when no database is configured. Has the
/// same semantics as the PostgreSQL implementation, plus a failure switch for
/// exercising data-access error paths.
///
/// # Example
///
/// ```
/// use expense_storage::InMemoryExpenseRepository;
///
/// let store = InMemoryExpenseRepository::new();
/// assert!(store.is_empty());
/// ```
pub struct InMemoryExpenseRepository {
    rows: RwLock<BTreeMap<i64, Expense>>,
    next_id: AtomicI64,
    writes: AtomicUsize,
    failure: RwLock<Option<String>>,
}

impl InMemoryExpenseRepository {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            writes: AtomicUsize::new(0),
            failure: RwLock::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Successful write operations so far (save, save_all, delete)
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with a database error
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    pub fn clear_failure(&self) {
        *self.failure.write() = None;
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.rows.write().clear();
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        match &*self.failure.read() {
            Some(message) => Err(StoreError::Database(message.clone())),
            None => Ok(()),
        }
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn newest_first(mut rows: Vec<Expense>) -> Vec<Expense> {
        rows.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        rows
    }
}

impl Default for InMemoryExpenseRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExpenseRepository for InMemoryExpenseRepository {
    async fn find_by_user_ordered_by_date_desc(
        &self,
        user_id: i64,
    ) -> Result<Vec<Expense>, StoreError> {
        self.check_failure()?;
        let rows = self
            .rows
            .read()
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        Ok(Self::newest_first(rows))
    }

    async fn find_by_user_and_date_between(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Expense>, StoreError> {
        self.check_failure()?;
        let rows = self
            .rows
            .read()
            .values()
            .filter(|e| e.user_id == user_id && start <= e.date && e.date <= end)
            .cloned()
            .collect();
        Ok(Self::newest_first(rows))
    }

    async fn find_by_id_and_user(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<Option<Expense>, StoreError> {
        self.check_failure()?;
        Ok(self
            .rows
            .read()
            .get(&id)
            .filter(|e| e.user_id == user_id)
            .cloned())
    }

    async fn save(&self, draft: ExpenseDraft) -> Result<Expense, StoreError> {
        self.check_failure()?;
        let mut rows = self.rows.write();

        let id = match draft.id {
            Some(id) if !owned_by(&rows, id, draft.user_id) => {
                return Err(StoreError::NotFound(id))
            }
            Some(id) => id,
            None => self.allocate_id(),
        };
        let expense = draft.into_expense(id);
        rows.insert(id, expense.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(expense)
    }

    async fn save_all(&self, drafts: Vec<ExpenseDraft>) -> Result<Vec<Expense>, StoreError> {
        self.check_failure()?;
        let mut rows = self.rows.write();

        if let Some(missing) = drafts
            .iter()
            .find_map(|d| d.id.filter(|&id| !owned_by(&rows, id, d.user_id)))
        {
            return Err(StoreError::NotFound(missing));
        }

        let saved: Vec<Expense> = drafts
            .into_iter()
            .map(|draft| {
                let id = draft.id.unwrap_or_else(|| self.allocate_id());
                draft.into_expense(id)
            })
            .collect();
        for expense in &saved {
            rows.insert(expense.id, expense.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(saved)
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError> {
        self.check_failure()?;
        let removed = self.rows.write().remove(&id).is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }

    async fn find_distinct_user_ids(&self) -> Result<Vec<i64>, StoreError> {
        self.check_failure()?;
        let ids: BTreeSet<i64> = self.rows.read().values().map(|e| e.user_id).collect();
        Ok(ids.into_iter().collect())
    }
}

fn owned_by(rows: &BTreeMap<i64, Expense>, id: i64, user_id: i64) -> bool {
    rows.get(&id).is_some_and(|row| row.user_id == user_id)
}
