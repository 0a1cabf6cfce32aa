//! # Error Types
//!
//! Domain-specific error types for punch-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  punch-core errors (this file)                                         │
//! │  ├── CoreError        - General domain errors                          │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  punch-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  punch-sync errors (separate crate)                                    │
//! │  └── SyncError        - Terminal I/O and cycle failures                │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError/SyncError → operator      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (terminal id, user id, etc.)
//! 3. Errors are enum variants, never String

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Terminal cannot be found in the registry.
    #[error("Terminal not found: {0}")]
    TerminalNotFound(String),

    /// A terminal with this business id is already registered.
    #[error("Terminal '{0}' is already registered")]
    DuplicateTerminal(String),

    /// No employee mapping for a (terminal, terminal-local user) pair.
    ///
    /// ## When This Occurs
    /// - An employee punched a terminal they were enrolled on directly,
    ///   without the mapping ever being registered centrally
    /// - The mapping was removed after enrollment
    ///
    /// Per-event and non-fatal: the reconciler quarantines the event and
    /// the cycle completes with a `partial` outcome.
    #[error("No employee mapping for terminal {terminal_id} user {terminal_user_id}")]
    MappingMissing {
        terminal_id: String,
        terminal_user_id: String,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur when operator input doesn't meet requirements.
/// Used for early validation before registry writes.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., bad host, bad characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::MappingMissing {
            terminal_id: "T-001".to_string(),
            terminal_user_id: "99".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No employee mapping for terminal T-001 user 99"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "terminal_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
