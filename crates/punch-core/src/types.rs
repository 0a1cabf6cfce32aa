//! # Domain Types
//!
//! Core domain types used throughout Punchsync.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────┐   ┌──────────────────┐     │
//! │  │    Terminal     │   │ RawTerminalEvent │   │ AttendanceRecord │     │
//! │  │  ─────────────  │   │  ──────────────  │   │  ──────────────  │     │
//! │  │  id (UUID)      │   │  terminal_user_id│   │  id (UUID)       │     │
//! │  │  terminal_id    │   │  timestamp       │   │  dedup_key       │     │
//! │  │  host, port     │   │  kind            │   │  employee_id     │     │
//! │  │  status         │   │  verify          │   │  check_in/out    │     │
//! │  └─────────────────┘   └──────────────────┘   └──────────────────┘     │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ TerminalStatus  │   │   SyncOutcome   │   │AttendanceStatus │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  Unknown        │   │  Success        │   │  Present        │       │
//! │  │  Online/Offline │   │  Partial        │   │  Late           │       │
//! │  │  Error/Syncing  │   │  Failure        │   │  EarlyLeave     │       │
//! │  └─────────────────┘   └─────────────────┘   │  Absent         │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Terminals have:
//! - `id`: UUID v4 - immutable, used for database relations
//! - `terminal_id`: business id (vendor serial or operator-assigned) shown
//!   to operators and embedded in dedup keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Terminal Status
// =============================================================================

/// Connection/sync status of a registered terminal.
///
/// Mutated only by the terminal's own sync worker (and the connection pool
/// on its behalf) - never by two workers at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// Never contacted since registration.
    #[default]
    Unknown,
    /// Last sync cycle completed.
    Online,
    /// Terminal unreachable or timing out at connect.
    Offline,
    /// Protocol-level failure - needs operator attention.
    Error,
    /// A sync cycle is currently running against this terminal.
    Syncing,
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalStatus::Unknown => write!(f, "unknown"),
            TerminalStatus::Online => write!(f, "online"),
            TerminalStatus::Offline => write!(f, "offline"),
            TerminalStatus::Error => write!(f, "error"),
            TerminalStatus::Syncing => write!(f, "syncing"),
        }
    }
}

impl std::str::FromStr for TerminalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(TerminalStatus::Unknown),
            "online" => Ok(TerminalStatus::Online),
            "offline" => Ok(TerminalStatus::Offline),
            "error" => Ok(TerminalStatus::Error),
            "syncing" => Ok(TerminalStatus::Syncing),
            other => Err(format!("unknown terminal status: '{}'", other)),
        }
    }
}

// =============================================================================
// Terminal
// =============================================================================

/// A registered biometric terminal (the Device Registry row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terminal {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Business identifier - vendor serial or operator-assigned. Unique.
    pub terminal_id: String,

    /// Human-readable name (e.g., "Main Entrance").
    pub name: String,

    /// IP address or hostname of the terminal.
    pub host: String,

    /// TCP port (vendor default 4370).
    pub port: u16,

    /// Communication key for the protocol handshake (0 = none set).
    pub comm_key: u32,

    /// Seconds between scheduled sync cycles.
    pub sync_interval_secs: i64,

    /// Current status as observed by the sync engine.
    pub status: TerminalStatus,

    /// When the last successful sync cycle finished.
    pub last_sync_at: Option<DateTime<Utc>>,

    /// Inactive terminals are never scheduled (soft disable).
    pub is_active: bool,

    /// Free-text location.
    pub location: Option<String>,

    /// Free-text description.
    pub description: Option<String>,

    /// When the terminal was registered.
    pub created_at: DateTime<Utc>,

    /// When the registry row was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Terminal {
    /// Returns the socket address string for this terminal.
    #[inline]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if a scheduled sync is due at `now`.
    ///
    /// A terminal that has never synced is always due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_sync_at {
            None => true,
            Some(last) => last + chrono::Duration::seconds(self.sync_interval_secs) <= now,
        }
    }
}

// =============================================================================
// Raw Terminal Event
// =============================================================================

/// What the terminal claims the punch was.
///
/// Many firmware revisions report every punch with the same state byte, so
/// `Unspecified` is common in practice; the reconciler then infers in/out
/// by pairing punches per employee in timestamp order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CheckIn,
    CheckOut,
    Unspecified,
}

/// How the punch was verified on the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMethod {
    Fingerprint,
    Password,
    Card,
    Face,
    Unknown,
}

impl std::fmt::Display for VerifyMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyMethod::Fingerprint => write!(f, "fingerprint"),
            VerifyMethod::Password => write!(f, "password"),
            VerifyMethod::Card => write!(f, "card"),
            VerifyMethod::Face => write!(f, "face"),
            VerifyMethod::Unknown => write!(f, "unknown"),
        }
    }
}

/// One attendance log line as decoded off the wire.
///
/// Ephemeral: exists only between fetch and reconciliation. The
/// `terminal_user_id` is terminal-scoped, NOT globally unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTerminalEvent {
    /// Terminal-local user id (string id enrolled on the device).
    pub terminal_user_id: String,

    /// When the punch happened (terminal clock, second resolution).
    pub timestamp: DateTime<Utc>,

    /// Vendor-encoded timestamp as read off the wire. Kept alongside the
    /// decoded form because the cursor and dedup key are defined over it.
    pub encoded_timestamp: u32,

    /// Check-in / check-out / unspecified.
    pub kind: EventKind,

    /// Verification method used at the terminal.
    pub verify: VerifyMethod,
}

// =============================================================================
// Terminal User
// =============================================================================

/// A user record enrolled on a terminal.
///
/// Fetched each cycle and used to enrich quarantine entries with the
/// terminal-side display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalUser {
    /// Internal slot number on the device.
    pub uid: u16,

    /// Terminal-local user id (matches `RawTerminalEvent::terminal_user_id`).
    pub user_id: String,

    /// Display name as enrolled on the device.
    pub name: String,

    /// Device privilege level (0 = normal user, 14 = admin).
    pub privilege: u16,

    /// RFID card number (0 = none).
    pub card: u32,
}

// =============================================================================
// Employee Mapping
// =============================================================================

/// Association between a terminal-local user id and a central employee.
///
/// Invariant: a given (terminal_id, terminal_user_id) pair resolves to at
/// most one employee. Events with no mapping are quarantined, never guessed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeMapping {
    /// Business id of the terminal.
    pub terminal_id: String,

    /// Terminal-local user id.
    pub terminal_user_id: String,

    /// Central employee id this pair resolves to.
    pub employee_id: String,

    /// When the mapping was registered.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Attendance Record
// =============================================================================

/// Classified status of an attendance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    EarlyLeave,
    Absent,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceStatus::Present => write!(f, "present"),
            AttendanceStatus::Late => write!(f, "late"),
            AttendanceStatus::EarlyLeave => write!(f, "early_leave"),
            AttendanceStatus::Absent => write!(f, "absent"),
        }
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "late" => Ok(AttendanceStatus::Late),
            "early_leave" => Ok(AttendanceStatus::EarlyLeave),
            "absent" => Ok(AttendanceStatus::Absent),
            other => Err(format!("unknown attendance status: '{}'", other)),
        }
    }
}

/// An attendance record written to the attendance store.
///
/// Invariant: for a given `dedup_key`, at most one record ever exists; a
/// re-fetch of the same terminal log range updates rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Idempotence key: terminal_id + terminal_user_id + encoded punch time.
    pub dedup_key: String,

    /// Central employee id (resolved through the mapping).
    pub employee_id: String,

    /// First punch of the attendance session.
    pub check_in_time: DateTime<Utc>,

    /// Closing punch, once seen.
    pub check_out_time: Option<DateTime<Utc>>,

    /// Business id of the terminal the punches came from.
    pub source_terminal_id: String,

    /// Classified status.
    pub status: AttendanceStatus,

    /// Verification method of the opening punch.
    pub verify_method: VerifyMethod,

    /// When the record was first written.
    pub created_at: DateTime<Utc>,

    /// When the record was last updated (check-out completion).
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Quarantined Event
// =============================================================================

/// An event that could not be attributed to an employee.
///
/// Logged with enough detail for an operator to create the mapping later;
/// never silently dropped, never silently attributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedEvent {
    /// Business id of the terminal that reported the event.
    pub terminal_id: String,

    /// The unmapped terminal-local user id.
    pub terminal_user_id: String,

    /// Display name from the terminal's user table, when available.
    pub terminal_user_name: Option<String>,

    /// When the punch happened.
    pub event_timestamp: DateTime<Utc>,

    /// What the terminal claimed the punch was.
    pub kind: EventKind,
}

// =============================================================================
// Sync Log
// =============================================================================

/// Outcome of one sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Every fetched event was reconciled and recorded.
    Success,
    /// Cycle completed but some events were quarantined.
    Partial,
    /// Cycle aborted - nothing recorded, cursor unchanged.
    Failure,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Success => write!(f, "success"),
            SyncOutcome::Partial => write!(f, "partial"),
            SyncOutcome::Failure => write!(f, "failure"),
        }
    }
}

impl std::str::FromStr for SyncOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(SyncOutcome::Success),
            "partial" => Ok(SyncOutcome::Partial),
            "failure" => Ok(SyncOutcome::Failure),
            other => Err(format!("unknown sync outcome: '{}'", other)),
        }
    }
}

/// Append-only audit trail entry for one sync cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Business id of the terminal this cycle ran against.
    pub terminal_id: String,

    /// When the cycle started.
    pub started_at: DateTime<Utc>,

    /// When the cycle finished (success or failure).
    pub finished_at: DateTime<Utc>,

    /// Cycle outcome.
    pub outcome: SyncOutcome,

    /// Raw events fetched from the terminal.
    pub records_fetched: i64,

    /// Attendance records upserted.
    pub records_written: i64,

    /// Events quarantined for missing mappings.
    pub quarantined: i64,

    /// Error detail for failure outcomes.
    pub error_detail: Option<String>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_terminal_address() {
        let t = sample_terminal();
        assert_eq!(t.address(), "192.168.1.50:4370");
    }

    #[test]
    fn test_terminal_due_when_never_synced() {
        let t = sample_terminal();
        assert!(t.is_due(Utc::now()));
    }

    #[test]
    fn test_terminal_due_after_interval() {
        let mut t = sample_terminal();
        let last = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        t.last_sync_at = Some(last);
        t.sync_interval_secs = 300;

        assert!(!t.is_due(last + chrono::Duration::seconds(299)));
        assert!(t.is_due(last + chrono::Duration::seconds(300)));
        assert!(t.is_due(last + chrono::Duration::seconds(301)));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TerminalStatus::Unknown,
            TerminalStatus::Online,
            TerminalStatus::Offline,
            TerminalStatus::Error,
            TerminalStatus::Syncing,
        ] {
            let parsed: TerminalStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<TerminalStatus>().is_err());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(SyncOutcome::Partial.to_string(), "partial");
        assert_eq!(SyncOutcome::Failure.to_string(), "failure");
    }

    #[test]
    fn test_enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&AttendanceStatus::EarlyLeave).unwrap(),
            "\"early_leave\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::CheckIn).unwrap(),
            "\"check_in\""
        );
        let status: TerminalStatus = serde_json::from_str("\"offline\"").unwrap();
        assert_eq!(status, TerminalStatus::Offline);
    }

    fn sample_terminal() -> Terminal {
        let now = Utc::now();
        Terminal {
            id: "00000000-0000-0000-0000-000000000001".to_string(),
            terminal_id: "T-001".to_string(),
            name: "Main Entrance".to_string(),
            host: "192.168.1.50".to_string(),
            port: 4370,
            comm_key: 0,
            sync_interval_secs: 300,
            status: TerminalStatus::Unknown,
            last_sync_at: None,
            is_active: true,
            location: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}
