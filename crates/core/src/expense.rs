//! Expense rows and caller input

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A stored expense row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: i64,
    pub user_id: i64,
    pub expense_type: i32,
    pub date: NaiveDate,
    pub amount: f64,
    pub category: String,
    pub account: String,
    pub note: Option<String>,
}

/// A validated expense ready to be written
///
/// `id` is `None` for inserts and `Some` when replacing an existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDraft {
    pub id: Option<i64>,
    pub user_id: i64,
    pub expense_type: i32,
    pub date: NaiveDate,
    pub amount: f64,
    pub category: String,
    pub account: String,
    pub note: Option<String>,
}

impl ExpenseDraft {
    /// Materialize the draft as a stored row under `id`
    pub fn into_expense(self, id: i64) -> Expense {
        Expense {
            id,
            user_id: self.user_id,
            expense_type: self.expense_type,
            date: self.date,
            amount: self.amount,
            category: self.category,
            account: self.account,
            note: self.note,
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }
}

/// Expense input as submitted by a caller (single or bulk create, update)
///
/// Fields are optional where callers are known to omit them; the business
/// rules in [`crate::validation`] decide what is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseRequest {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub expense_type: i32,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl ExpenseRequest {
    pub fn new(amount: f64, category: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            amount,
            category: Some(category.into()),
            account: Some(account.into()),
            ..Default::default()
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_expense_type(mut self, expense_type: i32) -> Self {
        self.expense_type = expense_type;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_camel_case() {
        let json = r#"{
            "userId": 5,
            "expenseType": 2,
            "date": "2024-03-01",
            "amount": 12.5,
            "category": "Food",
            "account": "Cash"
        }"#;
        let request: ExpenseRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.user_id, Some(5));
        assert_eq!(request.expense_type, 2);
        assert_eq!(request.date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(request.category.as_deref(), Some("Food"));
        assert!(request.note.is_none());
    }

    #[test]
    fn test_request_missing_fields_default() {
        let request: ExpenseRequest = serde_json::from_str(r#"{"amount": 3.0}"#).unwrap();
        assert!(request.date.is_none());
        assert!(request.category.is_none());
        assert_eq!(request.expense_type, 0);
    }

    #[test]
    fn test_draft_into_expense() {
        let draft = ExpenseDraft {
            id: None,
            user_id: 9,
            expense_type: 1,
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            amount: 4.0,
            category: "Travel".into(),
            account: "Card".into(),
            note: Some("taxi".into()),
        };
        let expense = draft.into_expense(77);
        assert_eq!(expense.id, 77);
        assert_eq!(expense.user_id, 9);
        assert_eq!(expense.note.as_deref(), Some("taxi"));
    }
}
