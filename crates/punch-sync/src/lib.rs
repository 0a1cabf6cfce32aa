//! # punch-sync: Terminal Sync Engine
//!
//! Pulls attendance punches off fingerprint terminals over TCP, reconciles
//! them into daily attendance records, and commits each batch atomically.
//!
//! ## Engine Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          punch-sync Engine                              │
//! │                                                                         │
//! │  ┌──────────────┐   ticks / commands   ┌──────────────────────────┐    │
//! │  │  scheduler   │ ───────────────────► │        worker            │    │
//! │  │ due checks,  │                      │  one cycle per terminal: │    │
//! │  │ force-sync,  │                      │  acquire ► fetch ►       │    │
//! │  │ semaphore cap│                      │  reconcile ► commit      │    │
//! │  └──────────────┘                      └─────┬──────────────┬─────┘    │
//! │                                              │              │          │
//! │                                     ┌────────▼─────┐  ┌─────▼──────┐  │
//! │                                     │     pool     │  │ reconciler │  │
//! │                                     │ one session  │  │ pure batch │  │
//! │                                     │ per terminal │  │  pairing   │  │
//! │                                     └────────┬─────┘  └────────────┘  │
//! │                                              │                         │
//! │                                     ┌────────▼─────┐                   │
//! │                                     │     link     │                   │
//! │                                     │ TCP session, │                   │
//! │                                     │ handshake,   │                   │
//! │                                     │ table reads  │                   │
//! │                                     └────────┬─────┘                   │
//! │                                              │                         │
//! │                                     ┌────────▼─────┐                   │
//! │                                     │     wire     │                   │
//! │                                     │ packet codec,│                   │
//! │                                     │ vendor time, │                   │
//! │                                     │ record layout│                   │
//! │                                     └──────────────┘                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Persistence goes through `punch-db`; domain types and the classification
//! policy come from `punch-core`. The engine never talks SQL directly.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod link;
pub mod pool;
pub mod reconciler;
pub mod scheduler;
pub mod wire;
pub mod worker;

#[cfg(test)]
pub mod testsupport;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use config::{DatabaseSettings, EngineConfig, EngineSettings, PolicySettings};
pub use error::{SyncError, SyncResult};
pub use link::TerminalLink;
pub use pool::ConnectionPool;
pub use reconciler::{reconcile, ReconcileInput, ReconcileOutcome};
pub use scheduler::{Scheduler, SchedulerCommand, SchedulerHandle};
pub use worker::{CycleReport, SyncWorker};
