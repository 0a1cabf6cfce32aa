//! # Validation Module
//!
//! Input validation for terminal registration.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: CLI (clap)                                                   │
//! │  ├── Type validation (port is u16, interval is integer)                │
//! │  └── Immediate operator feedback                                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Business rule validation before registry writes                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── UNIQUE constraints (terminal_id, dedup_key)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Terminal Validators
// =============================================================================

/// Validates a terminal business id.
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 50 characters
/// - Only alphanumeric characters, hyphens, underscores (it is embedded in
///   dedup keys, where ':' is the field separator)
pub fn validate_terminal_id(terminal_id: &str) -> ValidationResult<()> {
    let terminal_id = terminal_id.trim();

    if terminal_id.is_empty() {
        return Err(ValidationError::Required {
            field: "terminal_id".to_string(),
        });
    }

    if terminal_id.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "terminal_id".to_string(),
            max: 50,
        });
    }

    if !terminal_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "terminal_id".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a terminal host.
///
/// ## Rules
/// - Must not be empty
/// - Must be at most 253 characters (DNS name limit)
/// - No whitespace
pub fn validate_host(host: &str) -> ValidationResult<()> {
    let host = host.trim();

    if host.is_empty() {
        return Err(ValidationError::Required {
            field: "host".to_string(),
        });
    }

    if host.len() > 253 {
        return Err(ValidationError::TooLong {
            field: "host".to_string(),
            max: 253,
        });
    }

    if host.chars().any(|c| c.is_whitespace()) {
        return Err(ValidationError::InvalidFormat {
            field: "host".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a terminal port.
pub fn validate_port(port: u16) -> ValidationResult<()> {
    if port == 0 {
        return Err(ValidationError::OutOfRange {
            field: "port".to_string(),
            min: 1,
            max: u16::MAX as i64,
        });
    }
    Ok(())
}

/// Validates a sync interval in seconds.
///
/// ## Rules
/// - At least 30 seconds: the protocol reads the full log table each cycle,
///   and terminals serve one session at a time
/// - At most 24 hours: anything longer defeats the dashboard's purpose
pub fn validate_sync_interval(secs: i64) -> ValidationResult<()> {
    if !(30..=86_400).contains(&secs) {
        return Err(ValidationError::OutOfRange {
            field: "sync_interval_secs".to_string(),
            min: 30,
            max: 86_400,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_id() {
        assert!(validate_terminal_id("T-001").is_ok());
        assert!(validate_terminal_id("main_gate_2").is_ok());
        assert!(validate_terminal_id("").is_err());
        assert!(validate_terminal_id("has space").is_err());
        assert!(validate_terminal_id("has:colon").is_err());
        assert!(validate_terminal_id(&"x".repeat(51)).is_err());
    }

    #[test]
    fn test_host() {
        assert!(validate_host("192.168.1.50").is_ok());
        assert!(validate_host("terminal-01.lan").is_ok());
        assert!(validate_host("").is_err());
        assert!(validate_host("bad host").is_err());
    }

    #[test]
    fn test_port() {
        assert!(validate_port(4370).is_ok());
        assert!(validate_port(0).is_err());
    }

    #[test]
    fn test_sync_interval() {
        assert!(validate_sync_interval(300).is_ok());
        assert!(validate_sync_interval(29).is_err());
        assert!(validate_sync_interval(86_401).is_err());
    }
}
