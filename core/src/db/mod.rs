//! Warehouse connection layer
//!
//! This module provides:
//! - Connection pooling (r2d2-sqlite) with pragmas and schema ATTACH
//! - An async bridge (`spawn_blocking`) for blocking SQLite calls
//! - Transaction helpers
//! - Table bootstrap for local warehouses

pub mod async_wrapper;
pub mod connection;
pub mod migrations;
pub mod transactions;

pub use async_wrapper::{Interrupter, with_connection, with_interruptible_connection};
pub use connection::{Warehouse, initialize_pool};
pub use transactions::execute_in_transaction;

/// Database module result type
pub type Result<T> = std::result::Result<T, DbError>;

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    Join(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Statement interrupted")]
    Interrupted,
}
