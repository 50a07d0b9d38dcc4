//! PostgreSQL implementation of ExpenseRepository

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use expense_core::{Expense, ExpenseDraft};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, error, info, instrument};

use super::store::{ExpenseRepository, StoreError};

const EXPENSE_COLUMNS: &str = "id, user_id, expense_type, date, amount, category, account, note";

/// PostgreSQL implementation of ExpenseRepository
///
/// # Example
///
/// ```ignore
/// use expense_storage::PostgresExpenseRepository;
///
/// let store = PostgresExpenseRepository::connect("postgres://localhost/expenses", 10).await?;
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresExpenseRepository {
    pool: PgPool,
}

impl PostgresExpenseRepository {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool against `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(db_error)?;
        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        info!("Expense schema migrations applied");
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn write_draft(
        tx: &mut Transaction<'_, Postgres>,
        draft: ExpenseDraft,
    ) -> Result<Expense, StoreError> {
        let row = match draft.id {
            None => {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO expenses (user_id, expense_type, date, amount, category, account, note)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    RETURNING {EXPENSE_COLUMNS}
                    "#
                ))
                .bind(draft.user_id)
                .bind(draft.expense_type)
                .bind(draft.date)
                .bind(draft.amount)
                .bind(&draft.category)
                .bind(&draft.account)
                .bind(&draft.note)
                .fetch_one(&mut **tx)
                .await
                .map_err(db_error)?
            }
            Some(id) => sqlx::query(&format!(
                r#"
                    UPDATE expenses
                    SET expense_type = $3, date = $4, amount = $5,
                        category = $6, account = $7, note = $8
                    WHERE id = $1 AND user_id = $2
                    RETURNING {EXPENSE_COLUMNS}
                    "#
            ))
            .bind(id)
            .bind(draft.user_id)
            .bind(draft.expense_type)
            .bind(draft.date)
            .bind(draft.amount)
            .bind(&draft.category)
            .bind(&draft.account)
            .bind(&draft.note)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error)?
            .ok_or(StoreError::NotFound(id))?,
        };

        row_to_expense(&row)
    }
}

#[async_trait]
impl ExpenseRepository for PostgresExpenseRepository {
    #[instrument(skip(self))]
    async fn find_by_user_ordered_by_date_desc(
        &self,
        user_id: i64,
    ) -> Result<Vec<Expense>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EXPENSE_COLUMNS} FROM expenses
            WHERE user_id = $1
            ORDER BY date DESC, id DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_expense).collect()
    }

    #[instrument(skip(self))]
    async fn find_by_user_and_date_between(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Expense>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EXPENSE_COLUMNS} FROM expenses
            WHERE user_id = $1 AND date BETWEEN $2 AND $3
            ORDER BY date DESC, id DESC
            "#
        ))
        .bind(user_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_expense).collect()
    }

    #[instrument(skip(self))]
    async fn find_by_id_and_user(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<Option<Expense>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_expense).transpose()
    }

    #[instrument(skip(self, draft), fields(user_id = draft.user_id))]
    async fn save(&self, draft: ExpenseDraft) -> Result<Expense, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let saved = Self::write_draft(&mut tx, draft).await?;
        tx.commit().await.map_err(db_error)?;

        debug!(expense_id = saved.id, "saved expense");
        Ok(saved)
    }

    #[instrument(skip(self, drafts), fields(count = drafts.len()))]
    async fn save_all(&self, drafts: Vec<ExpenseDraft>) -> Result<Vec<Expense>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let mut saved = Vec::with_capacity(drafts.len());
        for draft in drafts {
            // Dropping the transaction on error rolls every row back
            saved.push(Self::write_draft(&mut tx, draft).await?);
        }

        tx.commit().await.map_err(db_error)?;
        debug!(count = saved.len(), "saved expenses");
        Ok(saved)
    }

    #[instrument(skip(self))]
    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM expenses WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn find_distinct_user_ids(&self) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT user_id FROM expenses ORDER BY user_id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("user_id").map_err(db_error))
            .collect()
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    error!("Database operation failed: {}", e);
    StoreError::Database(e.to_string())
}

fn row_to_expense(row: &PgRow) -> Result<Expense, StoreError> {
    Ok(Expense {
        id: row.try_get("id").map_err(db_error)?,
        user_id: row.try_get("user_id").map_err(db_error)?,
        expense_type: row.try_get("expense_type").map_err(db_error)?,
        date: row.try_get("date").map_err(db_error)?,
        amount: row.try_get("amount").map_err(db_error)?,
        category: row.try_get("category").map_err(db_error)?,
        account: row.try_get("account").map_err(db_error)?,
        note: row.try_get("note").map_err(db_error)?,
    })
}
