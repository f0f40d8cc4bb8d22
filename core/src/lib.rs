//! `normas-core`: aplicavel synchronization engine.
//!
//! Keeps the normas store's `aplicavel`/`sistema_gestao` columns in line
//! with the external classification dataset:
//!
//! ```text
//! reset -> fetch -> aggregate -> apply -> verify
//! ```
//!
//! Also carries the read paths built on the same warehouse (norma listing,
//! single-norma lookup, management-system counts, orphan diagnostic).

pub mod aggregate;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod source;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use aggregate::{NormaLabels, aggregate};
pub use config::{ConfigError, NormasConfig};
pub use db::{DbError, Warehouse};
pub use error::{ErrorCategory, ReadError, SyncError};
pub use reconcile::Reconciler;
pub use source::{ClassificationSource, SqliteClassificationSource};
pub use store::{NormasStore, SqliteNormasStore};
