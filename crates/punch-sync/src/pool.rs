//! # Connection Pool
//!
//! At most one live session per terminal, reused across sync cycles.
//!
//! ## Slot States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Per-Terminal Slot                                  │
//! │                                                                         │
//! │   (no slot) ── acquire ──► CheckedOut ── release ──► Idle(session)     │
//! │                   │            ▲                        │               │
//! │                   │            │                        │               │
//! │              connect()     acquire takes            probe ping          │
//! │              on demand     the idle session         failure evicts      │
//! │                                                                         │
//! │   acquire() while CheckedOut → Busy, immediately. No queueing: a       │
//! │   terminal syncs one cycle at a time, callers skip and retry on the    │
//! │   next scheduler tick.                                                 │
//! │                                                                         │
//! │   Health: a session is evicted after a protocol error, or after two    │
//! │   consecutive timed-out cycles. A background probe pings sessions      │
//! │   idle past the threshold; recently used ones are left alone.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::link::TerminalLink;
use punch_core::Terminal;

/// Timeouts a session survives before being evicted.
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 2;

enum SlotState {
    Idle(TerminalLink),
    CheckedOut,
}

struct Slot {
    state: SlotState,
    consecutive_timeouts: u32,
}

/// Pool of terminal sessions, keyed by business terminal id.
///
/// Cheap to clone; all clones share the slot map.
#[derive(Clone)]
pub struct ConnectionPool {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    io_timeout: Duration,
    idle_threshold: Duration,
}

impl ConnectionPool {
    /// Creates an empty pool.
    ///
    /// `idle_threshold` is how long a session must sit without traffic
    /// before the background probe pings it.
    pub fn new(io_timeout: Duration, idle_threshold: Duration) -> Self {
        ConnectionPool {
            slots: Arc::new(Mutex::new(HashMap::new())),
            io_timeout,
            idle_threshold,
        }
    }

    /// Checks out the terminal's session, connecting if none is pooled.
    ///
    /// Returns [`SyncError::Busy`] without waiting if another cycle holds
    /// the session.
    pub async fn acquire(&self, terminal: &Terminal) -> SyncResult<TerminalLink> {
        {
            let mut slots = self.slots.lock().await;
            match slots.get_mut(&terminal.terminal_id) {
                Some(slot) => match std::mem::replace(&mut slot.state, SlotState::CheckedOut) {
                    SlotState::Idle(link) => {
                        debug!(terminal_id = %terminal.terminal_id, "Reusing pooled session");
                        return Ok(link);
                    }
                    SlotState::CheckedOut => {
                        return Err(SyncError::Busy {
                            terminal_id: terminal.terminal_id.clone(),
                        });
                    }
                },
                None => {
                    // Reserve the slot before connecting so concurrent
                    // acquires see Busy instead of double-connecting
                    slots.insert(
                        terminal.terminal_id.clone(),
                        Slot {
                            state: SlotState::CheckedOut,
                            consecutive_timeouts: 0,
                        },
                    );
                }
            }
        }

        match TerminalLink::connect(terminal, self.io_timeout).await {
            Ok(link) => Ok(link),
            Err(e) => {
                self.slots.lock().await.remove(&terminal.terminal_id);
                Err(e)
            }
        }
    }

    /// Returns a healthy session to the pool.
    pub async fn release(&self, link: TerminalLink) {
        let terminal_id = link.terminal_id().to_string();
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&terminal_id) {
            slot.state = SlotState::Idle(link);
            slot.consecutive_timeouts = 0;
        }
    }

    /// Returns a session whose cycle timed out.
    ///
    /// The session stays pooled for one more chance; a second consecutive
    /// timeout evicts it so the next cycle reconnects fresh.
    pub async fn release_after_timeout(&self, link: TerminalLink) {
        let terminal_id = link.terminal_id().to_string();
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&terminal_id) {
            slot.consecutive_timeouts += 1;
            if slot.consecutive_timeouts >= MAX_CONSECUTIVE_TIMEOUTS {
                warn!(terminal_id = %terminal_id, "Evicting session after repeated timeouts");
                slots.remove(&terminal_id);
            } else {
                slot.state = SlotState::Idle(link);
            }
        }
    }

    /// Drops the terminal's slot entirely (protocol error, restart, ...).
    ///
    /// The caller drops the link itself; the next acquire reconnects.
    pub async fn discard(&self, terminal_id: &str) {
        debug!(terminal_id = %terminal_id, "Discarding pooled session");
        self.slots.lock().await.remove(terminal_id);
    }

    /// Number of idle pooled sessions (diagnostics and tests).
    pub async fn idle_sessions(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|s| matches!(s.state, SlotState::Idle(_)))
            .count()
    }

    /// Pings sessions idle past the threshold, evicting the ones that fail.
    ///
    /// Checked-out sessions are left alone (their worker finds out soon
    /// enough), and so are sessions with recent traffic: a session a cycle
    /// just used is known-good and pinging it would briefly mark the slot
    /// busy for nothing.
    pub async fn probe_idle(&self) {
        // Take due sessions out so pings happen without holding the lock
        let mut taken: Vec<TerminalLink> = Vec::new();
        {
            let mut slots = self.slots.lock().await;
            for slot in slots.values_mut() {
                let due = matches!(
                    &slot.state,
                    SlotState::Idle(link) if link.idle_for() >= self.idle_threshold
                );
                if due {
                    if let SlotState::Idle(link) =
                        std::mem::replace(&mut slot.state, SlotState::CheckedOut)
                    {
                        taken.push(link);
                    }
                }
            }
        }

        for mut link in taken {
            let terminal_id = link.terminal_id().to_string();
            match link.ping().await {
                Ok(()) => self.release(link).await,
                Err(e) => {
                    info!(terminal_id = %terminal_id, error = %e, "Idle session failed probe");
                    self.discard(&terminal_id).await;
                }
            }
        }
    }

    /// Spawns the background probe loop. Abort the handle to stop it.
    pub fn spawn_probe(&self, interval: Duration) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                pool.probe_idle().await;
            }
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{sample_terminal, FakeTerminal};

    // Zero idle threshold: every idle session is due on the next probe
    fn test_pool() -> ConnectionPool {
        ConnectionPool::new(Duration::from_secs(2), Duration::ZERO)
    }

    #[tokio::test]
    async fn test_acquire_release_reuse() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());
        let pool = test_pool();

        let link = pool.acquire(&terminal).await.unwrap();
        pool.release(link).await;
        assert_eq!(pool.idle_sessions().await, 1);

        // Reuse instead of reconnect
        let link = pool.acquire(&terminal).await.unwrap();
        assert_eq!(pool.idle_sessions().await, 0);
        pool.release(link).await;
    }

    #[tokio::test]
    async fn test_checked_out_session_is_busy() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());
        let pool = test_pool();

        let link = pool.acquire(&terminal).await.unwrap();
        let err = pool.acquire(&terminal).await.unwrap_err();
        assert!(err.is_busy());

        pool.release(link).await;
        assert!(pool.acquire(&terminal).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_failure_clears_reservation() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());
        drop(fake);
        let pool = test_pool();

        let err = pool.acquire(&terminal).await.unwrap_err();
        assert!(err.is_connect_failure());
        // Slot not stuck at Busy after the failed connect
        let err = pool.acquire(&terminal).await.unwrap_err();
        assert!(err.is_connect_failure());
    }

    #[tokio::test]
    async fn test_second_consecutive_timeout_evicts() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());
        let pool = test_pool();

        let link = pool.acquire(&terminal).await.unwrap();
        pool.release_after_timeout(link).await;
        assert_eq!(pool.idle_sessions().await, 1);

        let link = pool.acquire(&terminal).await.unwrap();
        pool.release_after_timeout(link).await;
        assert_eq!(pool.idle_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_successful_release_resets_timeout_count() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());
        let pool = test_pool();

        let link = pool.acquire(&terminal).await.unwrap();
        pool.release_after_timeout(link).await;

        let link = pool.acquire(&terminal).await.unwrap();
        pool.release(link).await; // healthy cycle clears the count

        let link = pool.acquire(&terminal).await.unwrap();
        pool.release_after_timeout(link).await;
        // Still pooled: the count started over
        assert_eq!(pool.idle_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_probe_evicts_dead_sessions() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());
        let pool = test_pool();

        let link = pool.acquire(&terminal).await.unwrap();
        pool.release(link).await;
        drop(fake); // terminal goes away

        pool.probe_idle().await;
        assert_eq!(pool.idle_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_probe_skips_recently_active_sessions() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());
        let pool = ConnectionPool::new(Duration::from_secs(2), Duration::from_secs(3600));

        let link = pool.acquire(&terminal).await.unwrap();
        pool.release(link).await;
        // Even a dead session is left pooled while under the threshold; the
        // next cycle's own I/O will catch it
        drop(fake);

        pool.probe_idle().await;
        assert_eq!(pool.idle_sessions().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquires_admit_exactly_one() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());
        let pool = test_pool();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let terminal = terminal.clone();
            tasks.push(tokio::spawn(async move { pool.acquire(&terminal).await }));
        }

        // Hold the winner's link until every task has resolved, so the
        // outcome split is deterministic
        let mut links = Vec::new();
        let mut busy = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(link) => links.push(link),
                Err(e) => {
                    assert!(e.is_busy());
                    busy += 1;
                }
            }
        }
        assert_eq!(links.len(), 1);
        assert_eq!(busy, 7);

        for link in links {
            pool.release(link).await;
        }
    }
}
