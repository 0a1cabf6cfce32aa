//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    How the Worker Reacts                                │
//! │                                                                         │
//! │  Unreachable / Timeout at connect → terminal status: offline           │
//! │                                     failure log, cursor untouched       │
//! │                                                                         │
//! │  Protocol / Timeout after connect → terminal status: error             │
//! │                                     session evicted from the pool       │
//! │                                                                         │
//! │  Busy (session checked out)       → cycle silently skipped             │
//! │                                     no log row, no status change        │
//! │                                                                         │
//! │  Database                         → terminal status: error             │
//! │                                     link released healthy               │
//! │                                                                         │
//! │  Missing mapping is NOT an error: the event is quarantined and the     │
//! │  cycle continues (outcome: partial).                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// TCP connection to the terminal could not be established.
    #[error("Terminal unreachable at {address}: {detail}")]
    Unreachable { address: String, detail: String },

    /// An I/O operation did not complete within the configured timeout.
    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    /// The terminal sent something the codec could not make sense of.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The terminal's pooled session is already checked out.
    ///
    /// One sync cycle per terminal at a time; the caller skips this cycle.
    #[error("Terminal '{terminal_id}' is busy (sync already in progress)")]
    Busy { terminal_id: String },

    /// The terminal rejected the communication key.
    #[error("Terminal authentication rejected")]
    AuthRejected,

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] punch_db::DbError),

    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file I/O failed.
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing failed.
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A command channel was closed (engine shutting down).
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl SyncError {
    /// Helper for timeout errors.
    pub fn timeout(operation: impl Into<String>) -> Self {
        SyncError::Timeout {
            operation: operation.into(),
        }
    }

    /// True if the error means another cycle holds the terminal's session.
    pub fn is_busy(&self) -> bool {
        matches!(self, SyncError::Busy { .. })
    }

    /// True if the error occurred before a session was established.
    ///
    /// Connect-phase failures mark the terminal offline rather than errored.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, SyncError::Unreachable { .. })
    }

    /// True if the next scheduled cycle may simply try again.
    ///
    /// There is no inner retry loop: the scheduler tick is the retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Unreachable { .. }
                | SyncError::Timeout { .. }
                | SyncError::Busy { .. }
                | SyncError::Database(_)
        )
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_predicate() {
        let err = SyncError::Busy {
            terminal_id: "T-001".to_string(),
        };
        assert!(err.is_busy());
        assert!(err.is_retryable());
        assert!(!err.is_connect_failure());
    }

    #[test]
    fn test_connect_failure_predicate() {
        let err = SyncError::Unreachable {
            address: "10.0.0.5:4370".to_string(),
            detail: "connection refused".to_string(),
        };
        assert!(err.is_connect_failure());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_protocol_is_not_retryable() {
        assert!(!SyncError::Protocol("bad magic".to_string()).is_retryable());
    }
}
