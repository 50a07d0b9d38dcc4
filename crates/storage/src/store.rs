//! ExpenseRepository trait definition

use async_trait::async_trait;
use chrono::NaiveDate;
use expense_core::{Expense, ExpenseDraft, TaskError};

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Update targeted a row that does not exist
    #[error("expense not found: {0}")]
    NotFound(i64),

    /// Database error
    #[error("database error: {0}")]
    Database(String),
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => TaskError::not_found("Expense", id),
            StoreError::Database(message) => TaskError::DataAccess(message),
        }
    }
}

/// Persistence for expense rows
///
/// Every query is scoped by user id except `delete_by_id`, which callers
/// guard with an ownership check first.
#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    /// All rows of a user, newest date first
    async fn find_by_user_ordered_by_date_desc(
        &self,
        user_id: i64,
    ) -> Result<Vec<Expense>, StoreError>;

    /// Rows of a user with `start <= date <= end`, newest date first
    async fn find_by_user_and_date_between(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Expense>, StoreError>;

    /// A row only if it belongs to `user_id`
    async fn find_by_id_and_user(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<Option<Expense>, StoreError>;

    /// Insert when `draft.id` is `None`, otherwise replace the existing row
    ///
    /// A replacement only matches a row owned by `draft.user_id`; any other
    /// row is reported as [`StoreError::NotFound`].
    async fn save(&self, draft: ExpenseDraft) -> Result<Expense, StoreError>;

    /// Save every draft or none of them
    async fn save_all(&self, drafts: Vec<ExpenseDraft>) -> Result<Vec<Expense>, StoreError>;

    /// `true` if a row was deleted
    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError>;

    /// Every user id that owns at least one row, ascending
    async fn find_distinct_user_ids(&self) -> Result<Vec<i64>, StoreError>;
}
