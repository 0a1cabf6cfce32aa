//! # punch-db: Database Layer for Punchsync
//!
//! This crate provides database access for the terminal sync engine.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Punchsync Data Flow                               │
//! │                                                                         │
//! │  Sync Worker (one cycle)                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     punch-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ TerminalRepo  │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ MappingRepo   │    │ 001_init.sql │  │   │
//! │  │   │ Connection    │    │ AttendanceRepo│    │              │  │   │
//! │  │   │ Management    │    │ SyncLogRepo   │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL mode)                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (terminal, mapping, ...)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use punch_db::{Database, DbConfig};
//!
//! let config = DbConfig::new("path/to/punchsync.db");
//! let db = Database::new(config).await?;
//!
//! let terminals = db.terminals().list_active().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::attendance::AttendanceRepository;
pub use repository::mapping::MappingRepository;
pub use repository::sync_log::{NewSyncLogEntry, SyncLogRepository};
pub use repository::terminal::{NewTerminal, TerminalRepository};
