//! # Sync Scheduler
//!
//! Decides WHEN terminals sync; the worker decides HOW.
//!
//! ## Dispatch Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Scheduler Loop                                   │
//! │                                                                         │
//! │   every tick ──► list active terminals ──► due?                        │
//! │                                             │                           │
//! │                       due := last_sync_at + interval <= now             │
//! │                       (never-synced terminals are always due)           │
//! │                                             │                           │
//! │                                             ▼                           │
//! │                              spawn cycle task                           │
//! │                                │                                        │
//! │                                ▼                                        │
//! │                    semaphore permit (max_concurrent_syncs)              │
//! │                    over-cap cycles WAIT for a permit,                   │
//! │                    they are never dropped                               │
//! │                                │                                        │
//! │                                ▼                                        │
//! │                        worker.run_cycle()                               │
//! │                                                                         │
//! │   commands (from the CLI surface):                                      │
//! │   • force_sync(id)  - run one terminal now, due or not                  │
//! │   • sync_all        - run every active terminal now                     │
//! │   • shutdown        - stop the loop                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A cycle that lands while its terminal is still syncing hits the pool's
//! Busy answer inside the worker and skips; the scheduler itself never
//! tracks per-terminal state.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::worker::SyncWorker;
use punch_core::Terminal;
use punch_db::Database;

/// Commands accepted by a running scheduler.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Sync one terminal immediately, regardless of its interval.
    ForceSync { terminal_id: String },
    /// Sync every active terminal immediately.
    SyncAll,
    /// Stop the scheduler loop.
    Shutdown,
}

/// Cheap-to-clone handle for talking to a running scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Requests an immediate sync of one terminal.
    pub async fn force_sync(&self, terminal_id: &str) -> SyncResult<()> {
        self.send(SchedulerCommand::ForceSync {
            terminal_id: terminal_id.to_string(),
        })
        .await
    }

    /// Requests an immediate sync of every active terminal.
    pub async fn sync_all(&self) -> SyncResult<()> {
        self.send(SchedulerCommand::SyncAll).await
    }

    /// Asks the scheduler to stop.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send(SchedulerCommand::Shutdown).await
    }

    async fn send(&self, cmd: SchedulerCommand) -> SyncResult<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| SyncError::ChannelClosed("scheduler command channel".to_string()))
    }
}

/// The scheduling loop.
pub struct Scheduler {
    db: Database,
    worker: SyncWorker,
    tick_interval: Duration,
    permits: Arc<Semaphore>,
    rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    /// Creates a scheduler and its command handle.
    pub fn new(
        db: Database,
        worker: SyncWorker,
        tick_interval: Duration,
        max_concurrent_syncs: usize,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::channel(32);
        let scheduler = Scheduler {
            db,
            worker,
            tick_interval,
            permits: Arc::new(Semaphore::new(max_concurrent_syncs)),
            rx,
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Runs until shutdown. Spawned cycles drain on their own.
    pub async fn run(mut self) {
        info!(
            tick_secs = self.tick_interval.as_secs(),
            "Scheduler started"
        );
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_active(false).await;
                }
                cmd = self.rx.recv() => match cmd {
                    Some(SchedulerCommand::ForceSync { terminal_id }) => {
                        self.dispatch_one(&terminal_id).await;
                    }
                    Some(SchedulerCommand::SyncAll) => {
                        self.dispatch_active(true).await;
                    }
                    Some(SchedulerCommand::Shutdown) | None => {
                        info!("Scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Dispatches cycles for active terminals; `ignore_due` syncs them all.
    async fn dispatch_active(&self, ignore_due: bool) {
        let terminals = match self.db.terminals().list_active().await {
            Ok(terminals) => terminals,
            Err(e) => {
                error!(error = %e, "Failed to list terminals for dispatch");
                return;
            }
        };

        let now = Utc::now();
        for terminal in terminals {
            if ignore_due || terminal.is_due(now) {
                debug!(terminal_id = %terminal.terminal_id, "Dispatching sync cycle");
                self.spawn_cycle(terminal);
            }
        }
    }

    async fn dispatch_one(&self, terminal_id: &str) {
        match self.db.terminals().get(terminal_id).await {
            Ok(terminal) => self.spawn_cycle(terminal),
            Err(e) => warn!(terminal_id = %terminal_id, error = %e, "Cannot force-sync terminal"),
        }
    }

    fn spawn_cycle(&self, terminal: Terminal) {
        let permits = self.permits.clone();
        let worker = self.worker.clone();
        tokio::spawn(async move {
            // Waits its turn instead of dropping the cycle
            let Ok(_permit) = permits.acquire_owned().await else {
                return; // semaphore closed, engine going down
            };
            if let Err(e) = worker.run_cycle(&terminal).await {
                warn!(
                    terminal_id = %terminal.terminal_id,
                    error = %e,
                    "Sync cycle failed"
                );
            }
        });
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
