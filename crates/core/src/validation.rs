//! Business rules for expense input
//!
//! Rules run synchronously on the caller before any work is dispatched, so a
//! bad request never consumes pool capacity. Validation turns an
//! [`ExpenseRequest`] into an [`ExpenseDraft`] or the list of violated rules.

use crate::error::{TaskError, Violation};
use crate::expense::{ExpenseDraft, ExpenseRequest};

pub const AMOUNT_NOT_POSITIVE: &str = "amount must be positive";
pub const CATEGORY_REQUIRED: &str = "category is required";
pub const ACCOUNT_REQUIRED: &str = "account is required";
pub const DATE_REQUIRED: &str = "date is required";
pub const ID_NOT_POSITIVE: &str = "expense id must be a positive number";
pub const BATCH_EMPTY: &str = "at least one expense is required";

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Check a request and produce a draft owned by `user_id`
///
/// Returns every violated rule, not just the first one.
#[allow(clippy::neg_cmp_op_on_partial_ord)]
pub fn validate_request(
    request: &ExpenseRequest,
    user_id: i64,
) -> Result<ExpenseDraft, Vec<String>> {
    let mut messages = Vec::new();

    // Written as a negated comparison so NaN is rejected too
    if !(request.amount > 0.0) {
        messages.push(AMOUNT_NOT_POSITIVE.to_string());
    }

    let category = non_blank(&request.category);
    if category.is_none() {
        messages.push(CATEGORY_REQUIRED.to_string());
    }

    let account = non_blank(&request.account);
    if account.is_none() {
        messages.push(ACCOUNT_REQUIRED.to_string());
    }

    if request.date.is_none() {
        messages.push(DATE_REQUIRED.to_string());
    }

    match (request.date, category, account) {
        (Some(date), Some(category), Some(account)) if messages.is_empty() => Ok(ExpenseDraft {
            id: None,
            user_id,
            expense_type: request.expense_type,
            date,
            amount: request.amount,
            category,
            account,
            note: request.note.clone(),
        }),
        _ => Err(messages),
    }
}

/// Validate a single request, mapping failures to [`TaskError::Validation`]
pub fn validate_single(request: &ExpenseRequest, user_id: i64) -> Result<ExpenseDraft, TaskError> {
    validate_request(request, user_id)
        .map_err(|messages| TaskError::Validation(messages.into_iter().map(Violation::new).collect()))
}

/// Validate every item of a bulk request
///
/// Either all items are valid and all drafts are returned, or the indexed
/// violations of every invalid item are returned and nothing should be written.
pub fn validate_bulk(requests: &[ExpenseRequest], user_id: i64) -> Result<Vec<ExpenseDraft>, TaskError> {
    if requests.is_empty() {
        return Err(TaskError::validation(BATCH_EMPTY));
    }

    let mut drafts = Vec::with_capacity(requests.len());
    let mut violations = Vec::new();

    for (index, request) in requests.iter().enumerate() {
        match validate_request(request, user_id) {
            Ok(draft) => drafts.push(draft),
            Err(messages) => {
                violations.extend(messages.into_iter().map(|m| Violation::at(index, m)));
            }
        }
    }

    if violations.is_empty() {
        Ok(drafts)
    } else {
        Err(TaskError::Validation(violations))
    }
}

/// Reject non-positive row ids before touching storage
pub fn validate_expense_id(id: i64) -> Result<(), TaskError> {
    if id <= 0 {
        return Err(TaskError::validation(ID_NOT_POSITIVE));
    }
    Ok(())
}
