//! Read aggregation over stored expense rows
//!
//! All functions here are pure: the same rows and range always yield the same
//! totals. Only `generated_at` varies between runs and is supplied by the caller.

use std::collections::BTreeMap;

use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::expense::Expense;

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Range from `start` to `end` inclusive; `None` when `end < start`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn single_day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// The full calendar month; `None` for an invalid year/month
    pub fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = start.checked_add_months(Months::new(1))?.pred_opt()?;
        Some(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Report flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Monthly,
    Category,
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monthly => write!(f, "Monthly Report"),
            Self::Category => write!(f, "Category Report"),
        }
    }
}

/// Totals for one user over a date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseSummary {
    pub user_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_amount: f64,
    pub total_transactions: usize,
    /// Rounded half-up to two decimals, zero for an empty range
    pub average_amount: f64,
    pub generated_at: DateTime<Utc>,
}

/// Detailed report with the matching rows and a per-category breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseReport {
    pub report_type: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_amount: f64,
    pub total_transactions: usize,
    /// Category name -> total amount, ordered by category name
    pub by_category: BTreeMap<String, f64>,
    pub expenses: Vec<Expense>,
    pub generated_at: DateTime<Utc>,
}

pub fn total_amount(expenses: &[Expense]) -> f64 {
    expenses.iter().map(|e| e.amount).sum()
}

pub fn average_amount(expenses: &[Expense]) -> f64 {
    if expenses.is_empty() {
        return 0.0;
    }
    round_cents(total_amount(expenses) / expenses.len() as f64)
}

/// Half-up to two decimals on the shortest decimal form of `value`, so
/// 1.005 becomes 1.01 even though its binary form sits just below
fn round_cents(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let text = value.abs().to_string();
    let Some((whole, fraction)) = text.split_once('.') else {
        return value;
    };
    if fraction.len() <= 2 {
        return value;
    }
    let Ok(mut cents) = format!("{whole}{}", &fraction[..2]).parse::<u64>() else {
        return value;
    };
    if fraction.as_bytes()[2] >= b'5' {
        cents += 1;
    }
    (cents as f64 / 100.0).copysign(value)
}

pub fn category_totals(expenses: &[Expense]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for expense in expenses {
        *totals.entry(expense.category.clone()).or_insert(0.0) += expense.amount;
    }
    totals
}

/// Summarize the rows of `user_id` that fall inside `range`
///
/// Rows outside the range or owned by another user are ignored, so callers
/// may pass a superset.
pub fn summarize(
    expenses: &[Expense],
    user_id: i64,
    range: DateRange,
    generated_at: DateTime<Utc>,
) -> ExpenseSummary {
    let matching: Vec<Expense> = expenses
        .iter()
        .filter(|e| e.user_id == user_id && range.contains(e.date))
        .cloned()
        .collect();

    ExpenseSummary {
        user_id,
        start_date: range.start,
        end_date: range.end,
        total_amount: total_amount(&matching),
        total_transactions: matching.len(),
        average_amount: average_amount(&matching),
        generated_at,
    }
}

/// Build a report over the rows inside `range`, newest first
pub fn build_report(
    expenses: Vec<Expense>,
    range: DateRange,
    kind: ReportKind,
    generated_at: DateTime<Utc>,
) -> ExpenseReport {
    let mut matching: Vec<Expense> = expenses
        .into_iter()
        .filter(|e| range.contains(e.date))
        .collect();
    matching.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));

    ExpenseReport {
        report_type: kind.to_string(),
        start_date: range.start,
        end_date: range.end,
        total_amount: total_amount(&matching),
        total_transactions: matching.len(),
        by_category: category_totals(&matching),
        expenses: matching,
        generated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn expense(id: i64, user_id: i64, day: NaiveDate, amount: f64, category: &str) -> Expense {
        Expense {
            id,
            user_id,
            expense_type: 0,
            date: day,
            amount,
            category: category.into(),
            account: "Cash".into(),
            note: None,
        }
    }

    #[test]
    fn test_month_range() {
        let feb = DateRange::month(2024, 2).unwrap();
        assert_eq!(feb.start, date(2024, 2, 1));
        assert_eq!(feb.end, date(2024, 2, 29));
        assert_eq!(feb.days(), 29);

        let dec = DateRange::month(2023, 12).unwrap();
        assert_eq!(dec.end, date(2023, 12, 31));

        assert!(DateRange::month(2024, 13).is_none());
    }

    #[test]
    fn test_range_rejects_inverted_bounds() {
        assert!(DateRange::new(date(2024, 1, 2), date(2024, 1, 1)).is_none());
        assert!(DateRange::new(date(2024, 1, 1), date(2024, 1, 1)).is_some());
    }

    #[test]
    fn test_summary_filters_by_user_and_range() {
        let rows = vec![
            expense(1, 1, date(2024, 1, 10), 10.0, "Food"),
            expense(2, 1, date(2024, 1, 11), 20.0, "Food"),
            expense(3, 1, date(2024, 2, 1), 99.0, "Food"),
            expense(4, 2, date(2024, 1, 10), 50.0, "Food"),
        ];
        let range = DateRange::month(2024, 1).unwrap();
        let summary = summarize(&rows, 1, range, Utc::now());

        assert_eq!(summary.total_amount, 30.0);
        assert_eq!(summary.total_transactions, 2);
        assert_eq!(summary.average_amount, 15.0);
    }

    #[test]
    fn test_average_rounds_half_up() {
        let day = date(2024, 1, 1);
        let rows = vec![
            expense(1, 1, day, 0.125, "A"),
            expense(2, 1, day, 0.125, "A"),
        ];
        assert_eq!(average_amount(&rows), 0.13);
    }

    #[test]
    fn test_average_rounds_half_cent_up_despite_binary_form() {
        let day = date(2024, 1, 1);
        assert_eq!(average_amount(&[expense(1, 1, day, 1.005, "A")]), 1.01);

        let rows = vec![expense(1, 1, day, 1.0, "A"), expense(2, 1, day, 1.01, "A")];
        assert_eq!(average_amount(&rows), 1.01);

        let below = vec![expense(1, 1, day, 1.0049, "A")];
        assert_eq!(average_amount(&below), 1.0);
    }

    #[test]
    fn test_round_cents_keeps_sign_and_short_values() {
        assert_eq!(round_cents(-2.675), -2.68);
        assert_eq!(round_cents(12.5), 12.5);
        assert_eq!(round_cents(7.0), 7.0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = summarize(&[], 1, DateRange::single_day(date(2024, 1, 1)), Utc::now());
        assert_eq!(summary.total_amount, 0.0);
        assert_eq!(summary.total_transactions, 0);
        assert_eq!(summary.average_amount, 0.0);
    }

    #[test]
    fn test_summary_is_deterministic() {
        let rows = vec![
            expense(1, 1, date(2024, 3, 1), 12.3, "Food"),
            expense(2, 1, date(2024, 3, 2), 45.6, "Rent"),
        ];
        let range = DateRange::month(2024, 3).unwrap();
        let a = summarize(&rows, 1, range, Utc::now());
        let b = summarize(&rows, 1, range, Utc::now());
        assert_eq!(a.total_amount, b.total_amount);
        assert_eq!(a.total_transactions, b.total_transactions);
    }

    #[test]
    fn test_report_orders_newest_first_with_breakdown() {
        let rows = vec![
            expense(1, 1, date(2024, 4, 1), 5.0, "Food"),
            expense(2, 1, date(2024, 4, 20), 7.5, "Travel"),
            expense(3, 1, date(2024, 4, 20), 2.5, "Food"),
            expense(4, 1, date(2024, 5, 1), 100.0, "Food"),
        ];
        let report = build_report(rows, DateRange::month(2024, 4).unwrap(), ReportKind::Category, Utc::now());

        assert_eq!(report.report_type, "Category Report");
        assert_eq!(report.total_transactions, 3);
        assert_eq!(report.total_amount, 15.0);
        let ids: Vec<i64> = report.expenses.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(report.by_category.get("Food"), Some(&7.5));
        assert_eq!(report.by_category.get("Travel"), Some(&7.5));
        assert_eq!(
            report.by_category.keys().cloned().collect::<Vec<_>>(),
            vec!["Food".to_string(), "Travel".to_string()]
        );
    }
}
