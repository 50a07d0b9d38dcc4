//! # Expense core
//!
//! Domain types and pure logic shared by the executor, storage and service crates:
//!
//! - [`Expense`], [`ExpenseDraft`], [`ExpenseRequest`] - stored rows and caller input
//! - [`validation`] - business rules applied before any work is dispatched
//! - [`report`] - deterministic read aggregation ([`ExpenseSummary`], [`ExpenseReport`])
//! - [`TaskError`] / [`ErrorKind`] - the failure taxonomy carried through async results
//! - [`telemetry`] - tracing subscriber initialisation for binaries

pub mod error;
pub mod expense;
pub mod report;
pub mod telemetry;
pub mod user;
pub mod validation;

pub use error::{ErrorKind, TaskError, Violation};
pub use expense::{Expense, ExpenseDraft, ExpenseRequest};
pub use report::{DateRange, ExpenseReport, ExpenseSummary, ReportKind};
pub use user::UserRecord;
