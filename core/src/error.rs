//! Error taxonomy for the aplicavel sync engine.
//!
//! Phase failures abort the whole run. The caller must be able to tell a
//! source failure from a store failure, and whether the reset phase had
//! already cleared the flags when the run died (fail-closed).

use thiserror::Error;

use crate::db::DbError;
use crate::model::SyncPhase;

/// Error category for structured logging and RPC code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Classification dataset could not be queried
    SourceUnavailable,
    /// Normas store statement could not be executed
    StoreUnavailable,
    /// Another reconciliation run is in flight
    SyncInProgress,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::SyncInProgress => "SYNC_IN_PROGRESS",
        }
    }
}

/// Failure of a reconciliation run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("classification source unavailable during {phase}: {message}")]
    SourceUnavailable {
        phase: SyncPhase,
        message: String,
        /// Reset had already committed when the failure happened.
        flags_cleared: bool,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("normas store unavailable during {phase}: {message}")]
    StoreUnavailable {
        phase: SyncPhase,
        message: String,
        flags_cleared: bool,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("aplicavel sync already running")]
    ConcurrentSyncInProgress,
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SourceUnavailable { .. } => ErrorCategory::SourceUnavailable,
            Self::StoreUnavailable { .. } => ErrorCategory::StoreUnavailable,
            Self::ConcurrentSyncInProgress => ErrorCategory::SyncInProgress,
        }
    }

    /// Whether the store was left in the all-false state by this failure.
    pub fn flags_cleared(&self) -> bool {
        match self {
            Self::SourceUnavailable { flags_cleared, .. }
            | Self::StoreUnavailable { flags_cleared, .. } => *flags_cleared,
            Self::ConcurrentSyncInProgress => false,
        }
    }

    /// Operator-facing description of the failure.
    pub fn operator_message(&self) -> String {
        if self.flags_cleared() {
            format!("sync failed, applicability flags have been cleared: {self}")
        } else {
            self.to_string()
        }
    }

    pub fn source_unavailable(
        phase: SyncPhase,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SourceUnavailable {
            phase,
            message: source.to_string(),
            flags_cleared: false,
            source: Some(Box::new(source)),
        }
    }

    pub fn store_unavailable(
        phase: SyncPhase,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StoreUnavailable {
            phase,
            message: source.to_string(),
            flags_cleared: false,
            source: Some(Box::new(source)),
        }
    }

    /// A phase I/O call exceeded its deadline.
    pub fn timed_out(phase: SyncPhase, secs: u64) -> Self {
        let message = format!("timed out after {secs}s");
        if phase == SyncPhase::Fetching {
            Self::SourceUnavailable {
                phase,
                message,
                flags_cleared: false,
                source: None,
            }
        } else {
            Self::StoreUnavailable {
                phase,
                message,
                flags_cleared: false,
                source: None,
            }
        }
    }

    /// Mark that the reset phase had already committed.
    pub(crate) fn with_flags_cleared(mut self) -> Self {
        match &mut self {
            Self::SourceUnavailable { flags_cleared, .. }
            | Self::StoreUnavailable { flags_cleared, .. } => *flags_cleared = true,
            Self::ConcurrentSyncInProgress => {}
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Read-path failure, tagged with the side that failed.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("normas store unavailable: {0}")]
    Store(#[source] DbError),

    #[error("classification source unavailable: {0}")]
    Source(#[source] DbError),

    #[error("norma not found: {id}")]
    NotFound { id: i64 },
}
