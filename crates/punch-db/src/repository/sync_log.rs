//! # Sync Log Repository
//!
//! Append-only audit trail of sync cycles.
//!
//! Every completed cycle writes exactly one row here, failures included.
//! Operators read it with `punchctl log` when a terminal misbehaves.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use punch_core::{SyncLogEntry, SyncOutcome};

/// Input for appending a sync log entry (the id is assigned on write).
#[derive(Debug, Clone)]
pub struct NewSyncLogEntry {
    pub terminal_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub outcome: SyncOutcome,
    pub records_fetched: i64,
    pub records_written: i64,
    pub quarantined: i64,
    pub error_detail: Option<String>,
}

/// Repository for the sync audit trail.
#[derive(Debug, Clone)]
pub struct SyncLogRepository {
    pool: SqlitePool,
}

impl SyncLogRepository {
    /// Creates a new SyncLogRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncLogRepository { pool }
    }

    /// Appends one cycle's outcome to the log.
    pub async fn append(&self, new: NewSyncLogEntry) -> DbResult<SyncLogEntry> {
        let entry = SyncLogEntry {
            id: Uuid::new_v4().to_string(),
            terminal_id: new.terminal_id,
            started_at: new.started_at,
            finished_at: new.finished_at,
            outcome: new.outcome,
            records_fetched: new.records_fetched,
            records_written: new.records_written,
            quarantined: new.quarantined,
            error_detail: new.error_detail,
        };

        debug!(
            terminal_id = %entry.terminal_id,
            outcome = %entry.outcome,
            records_written = entry.records_written,
            "Appending sync log entry"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_log (
                id, terminal_id, started_at, finished_at, outcome,
                records_fetched, records_written, quarantined, error_detail
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.terminal_id)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .bind(entry.outcome.to_string())
        .bind(entry.records_fetched)
        .bind(entry.records_written)
        .bind(entry.quarantined)
        .bind(&entry.error_detail)
        .execute(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Lists recent entries for one terminal, newest first.
    pub async fn recent_for_terminal(
        &self,
        terminal_id: &str,
        limit: i64,
    ) -> DbResult<Vec<SyncLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sync_log
            WHERE terminal_id = ?1
            ORDER BY started_at DESC
            LIMIT ?2
            "#,
        )
        .bind(terminal_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Lists recent entries across all terminals, newest first.
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<SyncLogEntry>> {
        let rows = sqlx::query("SELECT * FROM sync_log ORDER BY started_at DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

/// Decodes a `sync_log` row into the domain type.
fn row_to_entry(row: &SqliteRow) -> DbResult<SyncLogEntry> {
    let outcome_raw: String = row.try_get("outcome")?;
    let outcome: SyncOutcome = outcome_raw.parse().map_err(DbError::CorruptValue)?;

    Ok(SyncLogEntry {
        id: row.try_get("id")?,
        terminal_id: row.try_get("terminal_id")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        outcome,
        records_fetched: row.try_get("records_fetched")?,
        records_written: row.try_get("records_written")?,
        quarantined: row.try_get("quarantined")?,
        error_detail: row.try_get("error_detail")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{Duration, Utc};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn sample_entry(terminal_id: &str, outcome: SyncOutcome, offset_secs: i64) -> NewSyncLogEntry {
        let started = Utc::now() + Duration::seconds(offset_secs);
        NewSyncLogEntry {
            terminal_id: terminal_id.to_string(),
            started_at: started,
            finished_at: started + Duration::seconds(2),
            outcome,
            records_fetched: 10,
            records_written: 8,
            quarantined: 2,
            error_detail: None,
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let db = test_db().await;
        let repo = db.sync_log();

        let entry = repo
            .append(sample_entry("T-001", SyncOutcome::Partial, 0))
            .await
            .unwrap();
        assert!(!entry.id.is_empty());

        let entries = repo.recent_for_terminal("T-001", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, SyncOutcome::Partial);
        assert_eq!(entries[0].records_fetched, 10);
        assert_eq!(entries[0].quarantined, 2);
    }

    #[tokio::test]
    async fn test_recent_orders_newest_first_and_limits() {
        let db = test_db().await;
        let repo = db.sync_log();

        repo.append(sample_entry("T-001", SyncOutcome::Success, 0))
            .await
            .unwrap();
        repo.append(sample_entry("T-001", SyncOutcome::Failure, 10))
            .await
            .unwrap();
        repo.append(sample_entry("T-002", SyncOutcome::Success, 20))
            .await
            .unwrap();

        let all = repo.recent(2).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].terminal_id, "T-002");

        let t1 = repo.recent_for_terminal("T-001", 10).await.unwrap();
        assert_eq!(t1.len(), 2);
        assert_eq!(t1[0].outcome, SyncOutcome::Failure);
    }

    #[tokio::test]
    async fn test_failure_entry_keeps_error_detail() {
        let db = test_db().await;
        let repo = db.sync_log();

        let mut entry = sample_entry("T-001", SyncOutcome::Failure, 0);
        entry.records_fetched = 0;
        entry.records_written = 0;
        entry.quarantined = 0;
        entry.error_detail = Some("connect timed out after 10s".to_string());
        repo.append(entry).await.unwrap();

        let entries = repo.recent_for_terminal("T-001", 1).await.unwrap();
        assert_eq!(
            entries[0].error_detail.as_deref(),
            Some("connect timed out after 10s")
        );
    }
}
