//! # Terminal Repository
//!
//! The Device Registry: CRUD over registered biometric terminals.
//!
//! ## Identity
//! Terminals carry two identifiers:
//! - `id` - UUID v4, immutable, used for nothing operator-facing
//! - `terminal_id` - business id, unique, embedded in dedup keys and shown
//!   in every log line
//!
//! Deactivation is soft (`is_active = 0`): the terminal drops out of the
//! schedule but its history, mappings and quarantine entries stay queryable.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use punch_core::{Terminal, TerminalStatus};

/// Input for registering a new terminal.
#[derive(Debug, Clone)]
pub struct NewTerminal {
    pub terminal_id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub comm_key: u32,
    pub sync_interval_secs: i64,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// Repository for Device Registry operations.
#[derive(Debug, Clone)]
pub struct TerminalRepository {
    pool: SqlitePool,
}

impl TerminalRepository {
    /// Creates a new TerminalRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TerminalRepository { pool }
    }

    /// Registers a new terminal.
    ///
    /// Fails with [`DbError::UniqueViolation`] if the `terminal_id` is
    /// already registered (active or not).
    pub async fn create(&self, new: NewTerminal) -> DbResult<Terminal> {
        let now = Utc::now();
        let terminal = Terminal {
            id: Uuid::new_v4().to_string(),
            terminal_id: new.terminal_id,
            name: new.name,
            host: new.host,
            port: new.port,
            comm_key: new.comm_key,
            sync_interval_secs: new.sync_interval_secs,
            status: TerminalStatus::Unknown,
            last_sync_at: None,
            is_active: true,
            location: new.location,
            description: new.description,
            created_at: now,
            updated_at: now,
        };

        debug!(
            terminal_id = %terminal.terminal_id,
            address = %terminal.address(),
            "Registering terminal"
        );

        sqlx::query(
            r#"
            INSERT INTO terminal (
                id, terminal_id, name, host, port, comm_key,
                sync_interval_secs, status, last_sync_at, is_active,
                location, description, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&terminal.id)
        .bind(&terminal.terminal_id)
        .bind(&terminal.name)
        .bind(&terminal.host)
        .bind(terminal.port as i64)
        .bind(terminal.comm_key as i64)
        .bind(terminal.sync_interval_secs)
        .bind(terminal.status.to_string())
        .bind(terminal.last_sync_at)
        .bind(terminal.is_active)
        .bind(&terminal.location)
        .bind(&terminal.description)
        .bind(terminal.created_at)
        .bind(terminal.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(terminal)
    }

    /// Fetches a terminal by its business id.
    pub async fn get(&self, terminal_id: &str) -> DbResult<Terminal> {
        let row = sqlx::query("SELECT * FROM terminal WHERE terminal_id = ?1")
            .bind(terminal_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Terminal", terminal_id))?;

        row_to_terminal(&row)
    }

    /// Lists active terminals (the scheduler's working set).
    pub async fn list_active(&self) -> DbResult<Vec<Terminal>> {
        let rows = sqlx::query("SELECT * FROM terminal WHERE is_active = 1 ORDER BY terminal_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_terminal).collect()
    }

    /// Lists all terminals, including deactivated ones.
    pub async fn list_all(&self) -> DbResult<Vec<Terminal>> {
        let rows = sqlx::query("SELECT * FROM terminal ORDER BY terminal_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_terminal).collect()
    }

    /// Updates the observed status of a terminal.
    pub async fn set_status(&self, terminal_id: &str, status: TerminalStatus) -> DbResult<()> {
        debug!(terminal_id = %terminal_id, status = %status, "Updating terminal status");

        let result = sqlx::query(
            "UPDATE terminal SET status = ?1, updated_at = ?2 WHERE terminal_id = ?3",
        )
        .bind(status.to_string())
        .bind(Utc::now())
        .bind(terminal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Terminal", terminal_id));
        }
        Ok(())
    }

    /// Marks a sync cycle as completed: status online, `last_sync_at` set.
    pub async fn mark_synced(&self, terminal_id: &str, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE terminal
            SET status = ?1, last_sync_at = ?2, updated_at = ?3
            WHERE terminal_id = ?4
            "#,
        )
        .bind(TerminalStatus::Online.to_string())
        .bind(at)
        .bind(Utc::now())
        .bind(terminal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Terminal", terminal_id));
        }
        Ok(())
    }

    /// Updates the mutable registry fields of a terminal.
    ///
    /// `terminal_id`, `created_at` and sync bookkeeping are left untouched.
    pub async fn update(&self, terminal: &Terminal) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE terminal
            SET name = ?1, host = ?2, port = ?3, comm_key = ?4,
                sync_interval_secs = ?5, location = ?6, description = ?7,
                updated_at = ?8
            WHERE terminal_id = ?9
            "#,
        )
        .bind(&terminal.name)
        .bind(&terminal.host)
        .bind(terminal.port as i64)
        .bind(terminal.comm_key as i64)
        .bind(terminal.sync_interval_secs)
        .bind(&terminal.location)
        .bind(&terminal.description)
        .bind(Utc::now())
        .bind(&terminal.terminal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Terminal", &terminal.terminal_id));
        }
        Ok(())
    }

    /// Soft-deactivates a terminal.
    ///
    /// The terminal stops being scheduled; history remains intact.
    pub async fn deactivate(&self, terminal_id: &str) -> DbResult<()> {
        debug!(terminal_id = %terminal_id, "Deactivating terminal");

        let result = sqlx::query(
            "UPDATE terminal SET is_active = 0, updated_at = ?1 WHERE terminal_id = ?2",
        )
        .bind(Utc::now())
        .bind(terminal_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Terminal", terminal_id));
        }
        Ok(())
    }
}

/// Decodes a `terminal` row into the domain type.
fn row_to_terminal(row: &SqliteRow) -> DbResult<Terminal> {
    let status_raw: String = row.try_get("status")?;
    let status: TerminalStatus = status_raw.parse().map_err(DbError::CorruptValue)?;

    Ok(Terminal {
        id: row.try_get("id")?,
        terminal_id: row.try_get("terminal_id")?,
        name: row.try_get("name")?,
        host: row.try_get("host")?,
        port: row.try_get::<i64, _>("port")? as u16,
        comm_key: row.try_get::<i64, _>("comm_key")? as u32,
        sync_interval_secs: row.try_get("sync_interval_secs")?,
        status,
        last_sync_at: row.try_get("last_sync_at")?,
        is_active: row.try_get("is_active")?,
        location: row.try_get("location")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
