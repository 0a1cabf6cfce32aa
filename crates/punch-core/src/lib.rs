//! # punch-core: Pure Domain Logic for Punchsync
//!
//! This crate is the **heart** of the terminal sync engine. It contains the
//! attendance domain as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Punchsync Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  apps/punchctl (Operator CLI)                   │   │
//! │  │    register ──► sync ──► status ──► clear-logs ──► restart     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              punch-sync (Engine: link/pool/worker)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ punch-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                  │   │
//! │  │   │   types   │  │ classify  │  │ validation│                  │   │
//! │  │   │ Terminal  │  │ late/     │  │   rules   │                  │   │
//! │  │   │ RawEvent  │  │ early     │  │  checks   │                  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    punch-db (Database Layer)                    │   │
//! │  │              SQLite queries, migrations, repositories           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Terminal, RawTerminalEvent, AttendanceRecord, ...)
//! - [`classify`] - Status classification and dedup key derivation
//! - [`error`] - Domain error types
//! - [`validation`] - Terminal registration validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: classification is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod classify;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use punch_core::Terminal` instead of
// `use punch_core::types::Terminal`

pub use classify::{classify_check_in, dedup_key, is_early_leave, ReconcilePolicy};
pub use error::{CoreError, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default TCP port fingerprint terminals listen on.
///
/// ## Why a constant?
/// Every terminal model we integrate ships with this port preconfigured;
/// operators rarely change it. Registration falls back to it when no port
/// is supplied.
pub const DEFAULT_TERMINAL_PORT: u16 = 4370;

/// Default interval between scheduled sync cycles for a terminal.
pub const DEFAULT_SYNC_INTERVAL_SECS: i64 = 300;

/// Maximum attendance records accepted from a terminal in one cycle.
///
/// ## Business Reason
/// Terminals hold up to ~100k log entries. A freshly registered terminal
/// with a full log would otherwise stall its first cycle; the remainder is
/// picked up on subsequent ticks because the cursor only advances past
/// committed events.
pub const MAX_RECORDS_PER_CYCLE: usize = 10_000;
