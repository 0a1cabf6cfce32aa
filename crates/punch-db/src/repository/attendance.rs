//! # Attendance Repository
//!
//! The attendance store: classified records, the quarantine table, and the
//! per-terminal fetch cursor.
//!
//! ## The Recording Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION (commit_batch)                     │
//! │                                                                         │
//! │  1. INSERT new attendance records                                       │
//! │     ON CONFLICT(dedup_key) DO UPDATE  ← re-fetch updates, never dupes  │
//! │                                                                         │
//! │  2. UPDATE completed records (check-out fills in)                       │
//! │                                                                         │
//! │  3. INSERT quarantine rows for unmapped events                          │
//! │                                                                         │
//! │  4. UPSERT terminal_cursor to the newest committed event                │
//! │                                                                         │
//! │  COMMIT ← all or nothing                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cursor moves in the same transaction as the records it covers. If
//! anything in the batch fails, the cursor stays put and the next cycle
//! re-fetches the same range; the dedup_key upsert makes that re-fetch
//! harmless.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use punch_core::{AttendanceRecord, AttendanceStatus, QuarantinedEvent, VerifyMethod};

/// Repository for attendance records, quarantine and the fetch cursor.
#[derive(Debug, Clone)]
pub struct AttendanceRepository {
    pool: SqlitePool,
}

impl AttendanceRepository {
    /// Creates a new AttendanceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AttendanceRepository { pool }
    }

    // =========================================================================
    // Cursor
    // =========================================================================

    /// Loads the fetch cursor for a terminal (0 if never synced).
    ///
    /// The cursor is the vendor-encoded timestamp of the newest event that
    /// has been durably committed.
    pub async fn load_cursor(&self, terminal_id: &str) -> DbResult<u32> {
        let cursor: Option<i64> =
            sqlx::query_scalar("SELECT cursor FROM terminal_cursor WHERE terminal_id = ?1")
                .bind(terminal_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(cursor.unwrap_or(0) as u32)
    }

    // =========================================================================
    // Reads (reconciler preload)
    // =========================================================================

    /// Fetches existing records for a set of dedup keys, keyed by dedup_key.
    ///
    /// The reconciler preloads these so a re-fetched range turns into
    /// updates instead of failed inserts.
    pub async fn existing_for_keys(
        &self,
        keys: &[String],
    ) -> DbResult<HashMap<String, AttendanceRecord>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut qb = sqlx::QueryBuilder::<Sqlite>::new(
            "SELECT * FROM attendance_record WHERE dedup_key IN (",
        );
        let mut sep = qb.separated(", ");
        for key in keys {
            sep.push_bind(key);
        }
        qb.push(")");

        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            let record = row_to_record(row)?;
            map.insert(record.dedup_key.clone(), record);
        }
        Ok(map)
    }

    /// Fetches records from this terminal that have no check-out yet.
    ///
    /// Check-out punches (and unspecified punches) pair against these.
    pub async fn open_records_for_terminal(
        &self,
        terminal_id: &str,
    ) -> DbResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM attendance_record
            WHERE source_terminal_id = ?1 AND check_out_time IS NULL
            ORDER BY check_in_time
            "#,
        )
        .bind(terminal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Lists quarantined events for a terminal, newest first.
    pub async fn quarantined_for_terminal(
        &self,
        terminal_id: &str,
    ) -> DbResult<Vec<QuarantinedEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT terminal_id, terminal_user_id, terminal_user_name, event_timestamp, kind
            FROM quarantine
            WHERE terminal_id = ?1
            ORDER BY event_timestamp DESC
            "#,
        )
        .bind(terminal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let kind_raw: String = row.try_get("kind")?;
                Ok(QuarantinedEvent {
                    terminal_id: row.try_get("terminal_id")?,
                    terminal_user_id: row.try_get("terminal_user_id")?,
                    terminal_user_name: row.try_get("terminal_user_name")?,
                    event_timestamp: row.try_get("event_timestamp")?,
                    kind: parse_kind(&kind_raw)?,
                })
            })
            .collect()
    }

    // =========================================================================
    // Recording
    // =========================================================================

    /// Commits one reconciled batch atomically.
    ///
    /// Inserts, updates, quarantine rows and the cursor advance all land in
    /// a single transaction. On any error the transaction rolls back and the
    /// cursor is untouched, so no event range is ever skipped.
    pub async fn commit_batch(
        &self,
        terminal_id: &str,
        inserts: &[AttendanceRecord],
        updates: &[AttendanceRecord],
        quarantined: &[QuarantinedEvent],
        cursor: u32,
    ) -> DbResult<()> {
        debug!(
            terminal_id = %terminal_id,
            inserts = inserts.len(),
            updates = updates.len(),
            quarantined = quarantined.len(),
            cursor = cursor,
            "Committing reconciled batch"
        );

        let mut tx = self.pool.begin().await?;

        for record in inserts {
            insert_record(&mut tx, record).await?;
        }

        for record in updates {
            update_record(&mut tx, record).await?;
        }

        let now = Utc::now();
        for event in quarantined {
            sqlx::query(
                r#"
                INSERT INTO quarantine (
                    id, terminal_id, terminal_user_id, terminal_user_name,
                    event_timestamp, kind, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&event.terminal_id)
            .bind(&event.terminal_user_id)
            .bind(&event.terminal_user_name)
            .bind(event.event_timestamp)
            .bind(kind_str(event.kind))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO terminal_cursor (terminal_id, cursor, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(terminal_id) DO UPDATE SET
                cursor = excluded.cursor,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(terminal_id)
        .bind(cursor as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        Ok(())
    }
}

/// Inserts a new record; a concurrent dedup_key collision updates in place.
async fn insert_record(
    tx: &mut Transaction<'_, Sqlite>,
    record: &AttendanceRecord,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO attendance_record (
            id, dedup_key, employee_id, check_in_time, check_out_time,
            source_terminal_id, status, verify_method, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(dedup_key) DO UPDATE SET
            check_out_time = excluded.check_out_time,
            status = excluded.status,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.id)
    .bind(&record.dedup_key)
    .bind(&record.employee_id)
    .bind(record.check_in_time)
    .bind(record.check_out_time)
    .bind(&record.source_terminal_id)
    .bind(record.status.to_string())
    .bind(record.verify_method.to_string())
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Updates an existing record in place (check-out completion).
async fn update_record(
    tx: &mut Transaction<'_, Sqlite>,
    record: &AttendanceRecord,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE attendance_record
        SET check_out_time = ?1, status = ?2, updated_at = ?3
        WHERE id = ?4
        "#,
    )
    .bind(record.check_out_time)
    .bind(record.status.to_string())
    .bind(record.updated_at)
    .bind(&record.id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("AttendanceRecord", &record.id));
    }
    Ok(())
}

/// Decodes an `attendance_record` row into the domain type.
fn row_to_record(row: &SqliteRow) -> DbResult<AttendanceRecord> {
    let status_raw: String = row.try_get("status")?;
    let status: AttendanceStatus = status_raw.parse().map_err(DbError::CorruptValue)?;

    let verify_raw: String = row.try_get("verify_method")?;
    let verify_method = match verify_raw.as_str() {
        "fingerprint" => VerifyMethod::Fingerprint,
        "password" => VerifyMethod::Password,
        "card" => VerifyMethod::Card,
        "face" => VerifyMethod::Face,
        "unknown" => VerifyMethod::Unknown,
        other => {
            return Err(DbError::CorruptValue(format!(
                "unknown verify method: '{}'",
                other
            )))
        }
    };

    Ok(AttendanceRecord {
        id: row.try_get("id")?,
        dedup_key: row.try_get("dedup_key")?,
        employee_id: row.try_get("employee_id")?,
        check_in_time: row.try_get("check_in_time")?,
        check_out_time: row.try_get("check_out_time")?,
        source_terminal_id: row.try_get("source_terminal_id")?,
        status,
        verify_method,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn kind_str(kind: punch_core::EventKind) -> &'static str {
    match kind {
        punch_core::EventKind::CheckIn => "check_in",
        punch_core::EventKind::CheckOut => "check_out",
        punch_core::EventKind::Unspecified => "unspecified",
    }
}

fn parse_kind(s: &str) -> DbResult<punch_core::EventKind> {
    match s {
        "check_in" => Ok(punch_core::EventKind::CheckIn),
        "check_out" => Ok(punch_core::EventKind::CheckOut),
        "unspecified" => Ok(punch_core::EventKind::Unspecified),
        other => Err(DbError::CorruptValue(format!(
            "unknown event kind: '{}'",
            other
        ))),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
