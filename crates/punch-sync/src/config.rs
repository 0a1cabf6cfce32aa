//! # Engine Configuration
//!
//! Configuration for the sync engine daemon.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     PUNCHSYNC_DB_PATH=/var/lib/punchsync/punchsync.db                  │
//! │     PUNCHSYNC_TICK_INTERVAL=15                                         │
//! │                                                                         │
//! │  2. TOML Config File (punchsync.toml, path given on the CLI)           │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # punchsync.toml
//! [database]
//! path = "/var/lib/punchsync/punchsync.db"
//!
//! [engine]
//! tick_interval_secs = 30
//! max_concurrent_syncs = 10
//! io_timeout_secs = 10
//! probe_interval_secs = 60
//! idle_threshold_secs = 60
//!
//! [policy]
//! work_start = "09:00"
//! work_end = "17:00"
//! late_threshold_mins = 15
//! early_leave_threshold_mins = 15
//! ```

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use punch_core::ReconcilePolicy;

// =============================================================================
// Database Settings
// =============================================================================

/// Where the SQLite database lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("punchsync.db")
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
        }
    }
}

// =============================================================================
// Engine Settings
// =============================================================================

/// Scheduler and I/O behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Seconds between scheduler ticks (due-terminal checks).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Cap on simultaneously running sync cycles.
    /// Due terminals beyond the cap wait for a permit; none are dropped.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_syncs: usize,

    /// Per-call I/O timeout against terminals (seconds).
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    /// Seconds between idle-session health probes.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Seconds a pooled session must sit without traffic before a probe
    /// pings it. Sessions a cycle just used are skipped.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,
}

fn default_tick_interval() -> u64 {
    30
}
fn default_max_concurrent() -> usize {
    10
}
fn default_io_timeout() -> u64 {
    10
}
fn default_probe_interval() -> u64 {
    60
}
fn default_idle_threshold() -> u64 {
    60
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            tick_interval_secs: default_tick_interval(),
            max_concurrent_syncs: default_max_concurrent(),
            io_timeout_secs: default_io_timeout(),
            probe_interval_secs: default_probe_interval(),
            idle_threshold_secs: default_idle_threshold(),
        }
    }
}

// =============================================================================
// Policy Settings
// =============================================================================

/// Classification thresholds, as written in the config file.
///
/// Times are "HH:MM" strings in the file; [`PolicySettings::to_policy`]
/// parses them into a [`ReconcilePolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default = "default_work_start")]
    pub work_start: String,

    #[serde(default = "default_work_end")]
    pub work_end: String,

    #[serde(default = "default_late_threshold")]
    pub late_threshold_mins: u32,

    #[serde(default = "default_early_leave_threshold")]
    pub early_leave_threshold_mins: u32,
}

fn default_work_start() -> String {
    "09:00".to_string()
}
fn default_work_end() -> String {
    "17:00".to_string()
}
fn default_late_threshold() -> u32 {
    15
}
fn default_early_leave_threshold() -> u32 {
    15
}

impl Default for PolicySettings {
    fn default() -> Self {
        PolicySettings {
            work_start: default_work_start(),
            work_end: default_work_end(),
            late_threshold_mins: default_late_threshold(),
            early_leave_threshold_mins: default_early_leave_threshold(),
        }
    }
}

impl PolicySettings {
    /// Parses the settings into the reconciler's policy type.
    pub fn to_policy(&self) -> SyncResult<ReconcilePolicy> {
        let work_start = parse_time(&self.work_start)?;
        let work_end = parse_time(&self.work_end)?;
        Ok(ReconcilePolicy {
            work_start,
            work_end,
            late_threshold_mins: self.late_threshold_mins,
            early_leave_threshold_mins: self.early_leave_threshold_mins,
        })
    }
}

fn parse_time(s: &str) -> SyncResult<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| SyncError::InvalidConfig(format!("invalid time '{}', expected HH:MM", s)))
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub policy: PolicySettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (punchsync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<&Path>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads config or falls back to defaults on any failure.
    pub fn load_or_default(config_path: Option<&Path>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.engine.tick_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "tick_interval_secs must be greater than 0".into(),
            ));
        }
        if self.engine.max_concurrent_syncs == 0 {
            return Err(SyncError::InvalidConfig(
                "max_concurrent_syncs must be greater than 0".into(),
            ));
        }
        if self.engine.io_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "io_timeout_secs must be greater than 0".into(),
            ));
        }

        let policy = self.policy.to_policy()?;
        if policy.work_start >= policy.work_end {
            return Err(SyncError::InvalidConfig(
                "work_start must be before work_end".into(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("PUNCHSYNC_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }
        if let Ok(v) = std::env::var("PUNCHSYNC_TICK_INTERVAL") {
            if let Ok(secs) = v.parse() {
                self.engine.tick_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("PUNCHSYNC_MAX_CONCURRENT") {
            if let Ok(n) = v.parse() {
                self.engine.max_concurrent_syncs = n;
            }
        }
        if let Ok(v) = std::env::var("PUNCHSYNC_IO_TIMEOUT") {
            if let Ok(secs) = v.parse() {
                self.engine.io_timeout_secs = secs;
            }
        }
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Per-call terminal I/O timeout.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.io_timeout_secs)
    }

    /// Scheduler tick interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.engine.tick_interval_secs)
    }

    /// Idle-session probe interval.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.engine.probe_interval_secs)
    }

    /// Idle time before a pooled session becomes probe-eligible.
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.engine.idle_threshold_secs)
    }
}
