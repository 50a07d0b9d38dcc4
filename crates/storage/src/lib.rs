//! Persistence for expense rows
//!
//! This crate provides:
//! - [`ExpenseRepository`] trait for user-scoped expense queries and writes
//! - [`InMemoryExpenseRepository`] for tests and database-less runs
//! - [`PostgresExpenseRepository`] for production

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryExpenseRepository;
pub use postgres::PostgresExpenseRepository;
pub use store::{ExpenseRepository, StoreError};
