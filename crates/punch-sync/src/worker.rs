//! # Sync Worker
//!
//! Runs one sync cycle for one terminal.
//!
//! ## Cycle State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        One Sync Cycle                                   │
//! │                                                                         │
//! │  acquire ──── Busy ──────────────────────► skip (no log, no status)    │
//! │     │                                                                   │
//! │     ├──── Unreachable/Timeout ───────────► status: offline, log fail   │
//! │     ▼                                                                   │
//! │  status: syncing                                                        │
//! │     │                                                                   │
//! │  fetch logs + users ── Protocol/Timeout ─► status: error, log fail,    │
//! │     │                                      session evicted/benched      │
//! │     ▼                                                                   │
//! │  reconcile (pure, in memory)                                            │
//! │     │                                                                   │
//! │  record ── one transaction ── db error ──► status: error, log fail     │
//! │     │      (records + quarantine + cursor)                              │
//! │     ▼                                                                   │
//! │  status: online, last_sync_at = now                                     │
//! │  log: success (or partial if anything was quarantined)                  │
//! │  session released (held from acquire until here, so a concurrent       │
//! │  cycle for the same terminal skips as busy)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failures never advance the cursor: the next scheduled cycle re-fetches
//! the same range and the dedup keys make the overlap harmless.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::pool::ConnectionPool;
use crate::reconciler::{reconcile, ReconcileInput};
use punch_core::{ReconcilePolicy, SyncOutcome, Terminal, TerminalStatus, MAX_RECORDS_PER_CYCLE};
use punch_db::{Database, NewSyncLogEntry};

/// What one cycle did (or didn't do).
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub terminal_id: String,
    /// `None` when the cycle was skipped because the terminal was busy.
    pub outcome: Option<SyncOutcome>,
    pub fetched: usize,
    pub written: usize,
    pub quarantined: usize,
}

impl CycleReport {
    fn skipped(terminal_id: &str) -> Self {
        CycleReport {
            terminal_id: terminal_id.to_string(),
            outcome: None,
            fetched: 0,
            written: 0,
            quarantined: 0,
        }
    }
}

/// Executes sync cycles against terminals.
///
/// Stateless between cycles; cheap to clone and share across spawned tasks.
#[derive(Clone)]
pub struct SyncWorker {
    db: Database,
    pool: ConnectionPool,
    policy: ReconcilePolicy,
}

impl SyncWorker {
    /// Creates a new worker.
    pub fn new(db: Database, pool: ConnectionPool, policy: ReconcilePolicy) -> Self {
        SyncWorker { db, pool, policy }
    }

    /// Runs one full sync cycle for the given terminal.
    ///
    /// Busy terminals are skipped silently (Ok with `outcome: None`); every
    /// other completion - success, partial or failure - leaves a sync log
    /// entry behind.
    pub async fn run_cycle(&self, terminal: &Terminal) -> SyncResult<CycleReport> {
        let started_at = Utc::now();
        let terminal_id = terminal.terminal_id.as_str();

        let mut link = match self.pool.acquire(terminal).await {
            Ok(link) => link,
            Err(e) if e.is_busy() => {
                debug!(terminal_id = %terminal_id, "Sync already in progress, skipping cycle");
                return Ok(CycleReport::skipped(terminal_id));
            }
            Err(e) => {
                let status = match e {
                    SyncError::Unreachable { .. } | SyncError::Timeout { .. } => {
                        TerminalStatus::Offline
                    }
                    _ => TerminalStatus::Error,
                };
                warn!(terminal_id = %terminal_id, error = %e, "Connect failed");
                self.finish_failure(terminal_id, started_at, status, &e).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .db
            .terminals()
            .set_status(terminal_id, TerminalStatus::Syncing)
            .await
        {
            self.pool.release(link).await;
            let e = SyncError::from(e);
            self.finish_failure(terminal_id, started_at, TerminalStatus::Error, &e)
                .await;
            return Err(e);
        }

        // ---------------------------------------------------------------------
        // Fetching
        // ---------------------------------------------------------------------

        let cursor = match self.db.attendance().load_cursor(terminal_id).await {
            Ok(c) => c,
            Err(e) => {
                self.pool.release(link).await;
                let e = SyncError::from(e);
                self.finish_failure(terminal_id, started_at, TerminalStatus::Error, &e)
                    .await;
                return Err(e);
            }
        };

        let events = match link.fetch_logs(cursor, MAX_RECORDS_PER_CYCLE).await {
            Ok(events) => events,
            Err(e) => {
                self.bench_link(link, &e).await;
                self.finish_failure(terminal_id, started_at, TerminalStatus::Error, &e)
                    .await;
                return Err(e);
            }
        };

        let users = match link.fetch_users().await {
            Ok(users) => users,
            Err(e) => {
                self.bench_link(link, &e).await;
                self.finish_failure(terminal_id, started_at, TerminalStatus::Error, &e)
                    .await;
                return Err(e);
            }
        };

        // ---------------------------------------------------------------------
        // Reconciling
        // ---------------------------------------------------------------------

        // The session stays checked out until the writes land: releasing it
        // before the commit would let a second cycle run over the same
        // cursor range and double-write this terminal's rows
        let result = self
            .reconcile_and_record(terminal, started_at, cursor, &events, &users)
            .await;

        // Database failures are not the session's fault; it goes back healthy
        self.pool.release(link).await;

        match result {
            Ok(report) => Ok(report),
            Err(e) => {
                self.finish_failure(terminal_id, started_at, TerminalStatus::Error, &e)
                    .await;
                Err(e)
            }
        }
    }

    async fn reconcile_and_record(
        &self,
        terminal: &Terminal,
        started_at: chrono::DateTime<Utc>,
        cursor: u32,
        events: &[punch_core::RawTerminalEvent],
        users: &[punch_core::TerminalUser],
    ) -> SyncResult<CycleReport> {
        let terminal_id = terminal.terminal_id.as_str();

        let mappings = self.db.mappings().map_for_terminal(terminal_id).await?;

        let keys: Vec<String> = events
            .iter()
            .map(|e| punch_core::dedup_key(terminal_id, &e.terminal_user_id, e.encoded_timestamp))
            .collect();
        let existing = self.db.attendance().existing_for_keys(&keys).await?;
        let open_records = self
            .db
            .attendance()
            .open_records_for_terminal(terminal_id)
            .await?;

        let outcome = reconcile(ReconcileInput {
            terminal_id,
            events,
            mappings: &mappings,
            existing: &existing,
            open_records: &open_records,
            users,
            policy: &self.policy,
        });

        // ---------------------------------------------------------------------
        // Recording
        // ---------------------------------------------------------------------

        // Cursor never regresses, even over an all-duplicate batch
        let new_cursor = outcome
            .max_encoded_timestamp
            .map_or(cursor, |m| m.max(cursor));

        if outcome.written() > 0 || !outcome.quarantined.is_empty() || new_cursor != cursor {
            self.db
                .attendance()
                .commit_batch(
                    terminal_id,
                    &outcome.inserts,
                    &outcome.updates,
                    &outcome.quarantined,
                    new_cursor,
                )
                .await?;
        }

        let finished_at = Utc::now();
        self.db.terminals().mark_synced(terminal_id, finished_at).await?;

        let sync_outcome = if outcome.quarantined.is_empty() {
            SyncOutcome::Success
        } else {
            SyncOutcome::Partial
        };

        self.db
            .sync_log()
            .append(NewSyncLogEntry {
                terminal_id: terminal_id.to_string(),
                started_at,
                finished_at,
                outcome: sync_outcome,
                records_fetched: events.len() as i64,
                records_written: outcome.written() as i64,
                quarantined: outcome.quarantined.len() as i64,
                error_detail: None,
            })
            .await?;

        info!(
            terminal_id = %terminal_id,
            outcome = %sync_outcome,
            fetched = events.len(),
            written = outcome.written(),
            quarantined = outcome.quarantined.len(),
            "Sync cycle complete"
        );

        Ok(CycleReport {
            terminal_id: terminal_id.to_string(),
            outcome: Some(sync_outcome),
            fetched: events.len(),
            written: outcome.written(),
            quarantined: outcome.quarantined.len(),
        })
    }

    /// Disposes of a link after a mid-cycle I/O failure.
    ///
    /// Timeouts bench the session (evicted after two in a row); protocol
    /// errors evict immediately.
    async fn bench_link(&self, link: crate::link::TerminalLink, err: &SyncError) {
        let terminal_id = link.terminal_id().to_string();
        match err {
            SyncError::Timeout { .. } => self.pool.release_after_timeout(link).await,
            _ => {
                drop(link);
                self.pool.discard(&terminal_id).await;
            }
        }
    }

    /// Best-effort failure bookkeeping: status + failure log entry.
    async fn finish_failure(
        &self,
        terminal_id: &str,
        started_at: chrono::DateTime<Utc>,
        status: TerminalStatus,
        err: &SyncError,
    ) {
        if let Err(db_err) = self.db.terminals().set_status(terminal_id, status).await {
            warn!(terminal_id = %terminal_id, error = %db_err, "Failed to record terminal status");
        }

        let entry = NewSyncLogEntry {
            terminal_id: terminal_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome: SyncOutcome::Failure,
            records_fetched: 0,
            records_written: 0,
            quarantined: 0,
            error_detail: Some(err.to_string()),
        };
        if let Err(db_err) = self.db.sync_log().append(entry).await {
            warn!(terminal_id = %terminal_id, error = %db_err, "Failed to append failure log entry");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{sample_terminal, FakeTerminal};
    use crate::wire::encode_timestamp;
    use chrono::TimeZone;
    use punch_core::{AttendanceStatus, EventKind, RawTerminalEvent, VerifyMethod};
    use punch_db::{DbConfig, NewTerminal};
    use std::time::Duration;

    fn event(user: &str, h: u32, mi: u32, kind: EventKind) -> RawTerminalEvent {
        let ts = Utc.with_ymd_and_hms(2024, 3, 4, h, mi, 0).unwrap();
        RawTerminalEvent {
            terminal_user_id: user.to_string(),
            timestamp: ts,
            encoded_timestamp: encode_timestamp(ts),
            kind,
            verify: VerifyMethod::Fingerprint,
        }
    }

    async fn setup(port: u16) -> (Database, SyncWorker, Terminal) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.terminals()
            .create(NewTerminal {
                terminal_id: "T-001".to_string(),
                name: "Main Entrance".to_string(),
                host: "127.0.0.1".to_string(),
                port,
                comm_key: 0,
                sync_interval_secs: 300,
                location: None,
                description: None,
            })
            .await
            .unwrap();

        let pool = ConnectionPool::new(Duration::from_secs(2), Duration::from_secs(60));
        let worker = SyncWorker::new(db.clone(), pool, ReconcilePolicy::default());
        let terminal = sample_terminal("T-001", port);
        (db, worker, terminal)
    }

    #[tokio::test]
    async fn test_happy_path_cycle() {
        let fake = FakeTerminal::start(
            vec![
                event("7", 9, 2, EventKind::CheckIn),
                event("7", 17, 5, EventKind::CheckOut),
            ],
            vec![],
        )
        .await;
        let (db, worker, terminal) = setup(fake.port()).await;
        db.mappings().register("T-001", "7", "E1").await.unwrap();

        let report = worker.run_cycle(&terminal).await.unwrap();
        assert_eq!(report.outcome, Some(SyncOutcome::Success));
        assert_eq!(report.fetched, 2);
        assert_eq!(report.written, 1);
        assert_eq!(report.quarantined, 0);

        // One completed record for E1
        let open = db.attendance().open_records_for_terminal("T-001").await.unwrap();
        assert!(open.is_empty());
        let key = punch_core::dedup_key(
            "T-001",
            "7",
            encode_timestamp(Utc.with_ymd_and_hms(2024, 3, 4, 9, 2, 0).unwrap()),
        );
        let existing = db.attendance().existing_for_keys(&[key.clone()]).await.unwrap();
        let rec = &existing[&key];
        assert_eq!(rec.employee_id, "E1");
        assert_eq!(rec.status, AttendanceStatus::Present);
        assert!(rec.check_out_time.is_some());

        // Registry updated
        let t = db.terminals().get("T-001").await.unwrap();
        assert_eq!(t.status, TerminalStatus::Online);
        assert!(t.last_sync_at.is_some());

        // Cursor is at the newest event
        let cursor = db.attendance().load_cursor("T-001").await.unwrap();
        assert_eq!(
            cursor,
            encode_timestamp(Utc.with_ymd_and_hms(2024, 3, 4, 17, 5, 0).unwrap())
        );

        // Audit trail
        let log = db.sync_log().recent_for_terminal("T-001", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, SyncOutcome::Success);
    }

    #[tokio::test]
    async fn test_unmapped_user_partial_outcome() {
        let fake = FakeTerminal::start(
            vec![
                event("7", 9, 2, EventKind::CheckIn),
                event("99", 9, 3, EventKind::CheckIn),
            ],
            vec![],
        )
        .await;
        let (db, worker, terminal) = setup(fake.port()).await;
        db.mappings().register("T-001", "7", "E1").await.unwrap();

        let report = worker.run_cycle(&terminal).await.unwrap();
        assert_eq!(report.outcome, Some(SyncOutcome::Partial));
        assert_eq!(report.written, 1);
        assert_eq!(report.quarantined, 1);

        let quarantine = db.attendance().quarantined_for_terminal("T-001").await.unwrap();
        assert_eq!(quarantine.len(), 1);
        assert_eq!(quarantine[0].terminal_user_id, "99");

        // Cycle completed: terminal online, cursor advanced past BOTH events
        let t = db.terminals().get("T-001").await.unwrap();
        assert_eq!(t.status, TerminalStatus::Online);
        let cursor = db.attendance().load_cursor("T-001").await.unwrap();
        assert_eq!(
            cursor,
            encode_timestamp(Utc.with_ymd_and_hms(2024, 3, 4, 9, 3, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_offline_terminal_logged_and_cursor_untouched() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let port = fake.port();
        drop(fake);
        let (db, worker, terminal) = setup(port).await;

        let err = worker.run_cycle(&terminal).await.unwrap_err();
        assert!(err.is_connect_failure());

        let t = db.terminals().get("T-001").await.unwrap();
        assert_eq!(t.status, TerminalStatus::Offline);
        assert!(t.last_sync_at.is_none());

        assert_eq!(db.attendance().load_cursor("T-001").await.unwrap(), 0);

        let log = db.sync_log().recent_for_terminal("T-001", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, SyncOutcome::Failure);
        assert!(log[0].error_detail.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_fetch_is_idempotent() {
        let fake = FakeTerminal::start(
            vec![
                event("7", 9, 2, EventKind::CheckIn),
                event("7", 17, 5, EventKind::CheckOut),
            ],
            vec![],
        )
        .await;
        let (db, worker, terminal) = setup(fake.port()).await;
        db.mappings().register("T-001", "7", "E1").await.unwrap();

        worker.run_cycle(&terminal).await.unwrap();

        // Force a full re-fetch of the same range
        db.attendance()
            .commit_batch("T-001", &[], &[], &[], 0)
            .await
            .unwrap();

        let report = worker.run_cycle(&terminal).await.unwrap();
        assert_eq!(report.outcome, Some(SyncOutcome::Success));
        assert_eq!(report.fetched, 2);
        assert_eq!(report.written, 0); // nothing new, nothing duplicated

        let key = punch_core::dedup_key(
            "T-001",
            "7",
            encode_timestamp(Utc.with_ymd_and_hms(2024, 3, 4, 9, 2, 0).unwrap()),
        );
        let existing = db.attendance().existing_for_keys(&[key]).await.unwrap();
        assert_eq!(existing.len(), 1);
    }

    #[tokio::test]
    async fn test_check_out_arrives_in_later_cycle() {
        let fake = FakeTerminal::start(vec![event("7", 9, 2, EventKind::CheckIn)], vec![]).await;
        let (db, worker, terminal) = setup(fake.port()).await;
        db.mappings().register("T-001", "7", "E1").await.unwrap();

        worker.run_cycle(&terminal).await.unwrap();
        assert_eq!(
            db.attendance()
                .open_records_for_terminal("T-001")
                .await
                .unwrap()
                .len(),
            1
        );

        fake.push_event(event("7", 17, 5, EventKind::CheckOut));
        let report = worker.run_cycle(&terminal).await.unwrap();
        assert_eq!(report.written, 1); // the update

        let open = db.attendance().open_records_for_terminal("T-001").await.unwrap();
        assert!(open.is_empty());
    }

    #[tokio::test]
    async fn test_busy_terminal_skips_silently() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let (db, _, terminal) = setup(fake.port()).await;

        // Hold the session so the cycle finds the slot checked out
        let pool = ConnectionPool::new(Duration::from_secs(2), Duration::from_secs(60));
        let worker = SyncWorker::new(db.clone(), pool.clone(), ReconcilePolicy::default());
        let held = pool.acquire(&terminal).await.unwrap();

        let report = worker.run_cycle(&terminal).await.unwrap();
        assert_eq!(report.outcome, None);

        // No log row, no status change
        assert!(db
            .sync_log()
            .recent_for_terminal("T-001", 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            db.terminals().get("T-001").await.unwrap().status,
            TerminalStatus::Unknown
        );

        pool.release(held).await;
    }

    #[tokio::test]
    async fn test_concurrent_cycles_quarantine_once() {
        // Two cycles racing over one terminal: the winner keeps the session
        // through its commit, so the loser skips as busy (or re-fetches an
        // already-advanced cursor) and the unmapped punch is quarantined
        // exactly once.
        for _ in 0..3 {
            let fake =
                FakeTerminal::start(vec![event("99", 9, 2, EventKind::CheckIn)], vec![]).await;
            let (db, worker, terminal) = setup(fake.port()).await;

            let (a, b) = tokio::join!(worker.run_cycle(&terminal), worker.run_cycle(&terminal));
            a.unwrap();
            b.unwrap();

            let quarantine = db.attendance().quarantined_for_terminal("T-001").await.unwrap();
            assert_eq!(quarantine.len(), 1);

            let log = db.sync_log().recent_for_terminal("T-001", 10).await.unwrap();
            let partials = log
                .iter()
                .filter(|e| e.outcome == SyncOutcome::Partial)
                .count();
            assert_eq!(partials, 1);
        }
    }

    #[tokio::test]
    async fn test_quarantine_gets_terminal_user_name() {
        let ghost = punch_core::TerminalUser {
            uid: 9,
            user_id: "99".to_string(),
            name: "Night Guard".to_string(),
            privilege: 0,
            card: 0,
        };
        let fake =
            FakeTerminal::start(vec![event("99", 22, 0, EventKind::CheckIn)], vec![ghost]).await;
        let (db, worker, terminal) = setup(fake.port()).await;

        worker.run_cycle(&terminal).await.unwrap();

        let quarantine = db.attendance().quarantined_for_terminal("T-001").await.unwrap();
        assert_eq!(quarantine[0].terminal_user_name.as_deref(), Some("Night Guard"));
    }
}
