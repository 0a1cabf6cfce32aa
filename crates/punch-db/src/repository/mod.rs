//! # Repository Module
//!
//! Database repository implementations for Punchsync.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Sync Worker                                                           │
//! │       │                                                                 │
//! │       │  db.attendance().commit_batch(...)                             │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  AttendanceRepository                                                  │
//! │  ├── existing_for_keys(&self, keys)                                    │
//! │  ├── open_records_for_terminal(&self, terminal_id)                     │
//! │  ├── commit_batch(&self, ...)  ← single transaction                    │
//! │  └── load_cursor(&self, terminal_id)                                   │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • Clean separation of concerns                                        │
//! │  • Easy to test against an in-memory database                          │
//! │  • SQL is isolated in one place                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`TerminalRepository`] - the Device Registry
//! - [`MappingRepository`] - terminal user → employee associations
//! - [`AttendanceRepository`] - attendance records, quarantine, fetch cursor
//! - [`SyncLogRepository`] - append-only sync audit trail
//!
//! [`TerminalRepository`]: terminal::TerminalRepository
//! [`MappingRepository`]: mapping::MappingRepository
//! [`AttendanceRepository`]: attendance::AttendanceRepository
//! [`SyncLogRepository`]: sync_log::SyncLogRepository

pub mod attendance;
pub mod mapping;
pub mod sync_log;
pub mod terminal;
