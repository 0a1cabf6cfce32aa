//! # Terminal Link
//!
//! One authenticated TCP session to one terminal.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Link Lifecycle                                   │
//! │                                                                         │
//! │  connect()                                                              │
//! │    │  TCP connect ──── io error ──────────► Unreachable                 │
//! │    │  CONNECT handshake                                                 │
//! │    │    ├── ACK_OK ──────────────────────► session established          │
//! │    │    ├── ACK_UNAUTH ── AUTH(comm_key) ─► ACK_OK or AuthRejected      │
//! │    │    └── anything else ───────────────► Protocol                     │
//! │    ▼                                                                    │
//! │  fetch_logs() / fetch_users() / ping() / clear_logs() / restart()       │
//! │    │  every I/O wrapped in the per-call timeout                         │
//! │    ▼                                                                    │
//! │  disconnect()  (EXIT, best effort)                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Links are owned by the connection pool; workers check them out for one
//! cycle at a time.

use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::wire::{self, cmd, Packet};
use punch_core::{RawTerminalEvent, Terminal, TerminalUser};

/// Upper bound on a single packet payload. Anything larger means a
/// desynchronized stream.
const MAX_PAYLOAD: usize = 1024 * 1024;

/// An established session with one terminal.
#[derive(Debug)]
pub struct TerminalLink {
    stream: TcpStream,
    terminal_id: String,
    address: String,
    session_id: u16,
    reply_id: u16,
    io_timeout: Duration,
    last_activity: Instant,
}

impl TerminalLink {
    /// Connects and performs the session handshake.
    pub async fn connect(terminal: &Terminal, io_timeout: Duration) -> SyncResult<Self> {
        let address = terminal.address();

        debug!(
            terminal_id = %terminal.terminal_id,
            address = %address,
            "Connecting to terminal"
        );

        let stream = match timeout(io_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(SyncError::Unreachable {
                    address,
                    detail: e.to_string(),
                })
            }
            Err(_) => return Err(SyncError::timeout(format!("connect to {}", address))),
        };

        let mut link = TerminalLink {
            stream,
            terminal_id: terminal.terminal_id.clone(),
            address,
            session_id: 0,
            reply_id: 0,
            io_timeout,
            last_activity: Instant::now(),
        };

        let resp = link.send_command(cmd::CONNECT, &[]).await?;
        link.session_id = resp.session_id;

        match resp.command {
            cmd::ACK_OK => {}
            cmd::ACK_UNAUTH => {
                let key = wire::auth_key(terminal.comm_key, link.session_id);
                let auth = link.send_command(cmd::AUTH, &key).await?;
                if auth.command != cmd::ACK_OK {
                    return Err(SyncError::AuthRejected);
                }
            }
            other => {
                return Err(SyncError::Protocol(format!(
                    "unexpected handshake reply: command {}",
                    other
                )))
            }
        }

        debug!(
            terminal_id = %link.terminal_id,
            session_id = link.session_id,
            "Session established"
        );

        Ok(link)
    }

    /// The business id of the terminal behind this link.
    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    /// How long the session has sat without traffic.
    ///
    /// The pool's probe skips sessions that were active more recently than
    /// the idle threshold.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Lightweight liveness probe for idle pooled sessions.
    pub async fn ping(&mut self) -> SyncResult<()> {
        let resp = self.send_command(cmd::GET_FREE_SIZES, &[]).await?;
        match resp.command {
            cmd::ACK_OK | cmd::ACK_DATA | cmd::DATA => Ok(()),
            other => Err(SyncError::Protocol(format!(
                "unexpected ping reply: command {}",
                other
            ))),
        }
    }

    /// Fetches attendance events newer than `since` (vendor-encoded cursor).
    ///
    /// Records are decoded, filtered by the cursor, sorted by encoded
    /// timestamp and capped at `max_records`. Undecodable records are
    /// skipped with a warning instead of failing the whole fetch.
    pub async fn fetch_logs(
        &mut self,
        since: u32,
        max_records: usize,
    ) -> SyncResult<Vec<RawTerminalEvent>> {
        let data = self.read_table(cmd::ATTLOG_RRQ).await?;

        let mut events = Vec::new();
        let mut chunks = data.chunks_exact(wire::ATT_RECORD_SIZE);
        for rec in &mut chunks {
            match wire::decode_attendance(rec) {
                Ok(event) => {
                    if event.encoded_timestamp > since {
                        events.push(event);
                    }
                }
                Err(e) => {
                    warn!(terminal_id = %self.terminal_id, error = %e, "Skipping bad attendance record");
                }
            }
        }
        if !chunks.remainder().is_empty() {
            warn!(
                terminal_id = %self.terminal_id,
                trailing = chunks.remainder().len(),
                "Attendance table has trailing bytes"
            );
        }

        events.sort_by_key(|e| e.encoded_timestamp);
        events.truncate(max_records);

        debug!(
            terminal_id = %self.terminal_id,
            since = since,
            fetched = events.len(),
            "Fetched attendance events"
        );
        Ok(events)
    }

    /// Fetches the terminal's enrolled user table.
    pub async fn fetch_users(&mut self) -> SyncResult<Vec<TerminalUser>> {
        let data = self.read_table(cmd::USERTEMP_RRQ).await?;

        let mut users = Vec::new();
        for rec in data.chunks_exact(wire::USER_RECORD_SIZE) {
            match wire::decode_user(rec) {
                Ok(user) => users.push(user),
                Err(e) => {
                    warn!(terminal_id = %self.terminal_id, error = %e, "Skipping bad user record");
                }
            }
        }
        Ok(users)
    }

    /// Erases the attendance log on the device.
    ///
    /// Destructive; only invoked by an explicit operator command, never by
    /// the sync loop.
    pub async fn clear_logs(&mut self) -> SyncResult<()> {
        let resp = self.send_command(cmd::CLEAR_ATTLOG, &[]).await?;
        if resp.command != cmd::ACK_OK {
            return Err(SyncError::Protocol(format!(
                "clear refused: command {}",
                resp.command
            )));
        }
        Ok(())
    }

    /// Restarts the terminal. The session is dead afterwards.
    pub async fn restart(&mut self) -> SyncResult<()> {
        let resp = self.send_command(cmd::RESTART, &[]).await?;
        if resp.command != cmd::ACK_OK {
            return Err(SyncError::Protocol(format!(
                "restart refused: command {}",
                resp.command
            )));
        }
        Ok(())
    }

    /// Ends the session. Best effort: the terminal may already be gone.
    pub async fn disconnect(mut self) {
        if let Err(e) = self.send_command(cmd::EXIT, &[]).await {
            debug!(terminal_id = %self.terminal_id, error = %e, "EXIT failed during disconnect");
        }
    }

    // =========================================================================
    // I/O plumbing
    // =========================================================================

    /// Sends one command and reads the terminal's reply.
    pub async fn send_command(&mut self, command: u16, data: &[u8]) -> SyncResult<Packet> {
        self.last_activity = Instant::now();
        self.reply_id = self.reply_id.wrapping_add(1);
        let packet = wire::build_packet(command, self.session_id, self.reply_id, data);

        match timeout(self.io_timeout, self.stream.write_all(&packet)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SyncError::Protocol(format!("write failed: {}", e))),
            Err(_) => return Err(SyncError::timeout(format!("write to {}", self.address))),
        }

        self.read_reply().await
    }

    /// Reads one framed packet off the stream.
    async fn read_reply(&mut self) -> SyncResult<Packet> {
        let mut header = [0u8; 8];
        self.read_exact_timed(&mut header).await?;

        if header[0..4] != wire::MAGIC {
            return Err(SyncError::Protocol("bad magic in packet header".to_string()));
        }
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if len < 8 || len > MAX_PAYLOAD {
            return Err(SyncError::Protocol(format!("implausible payload length {}", len)));
        }

        let mut payload = vec![0u8; len];
        self.read_exact_timed(&mut payload).await?;
        wire::parse_payload(&payload)
    }

    async fn read_exact_timed(&mut self, buf: &mut [u8]) -> SyncResult<()> {
        match timeout(self.io_timeout, self.stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SyncError::Protocol(format!("read failed: {}", e))),
            Err(_) => Err(SyncError::timeout(format!("read from {}", self.address))),
        }
    }

    /// Requests a whole table and assembles it, whichever transfer mode
    /// the firmware picks.
    async fn read_table(&mut self, command: u16) -> SyncResult<Vec<u8>> {
        let resp = self.send_command(command, &[]).await?;

        let mut assembled = match resp.command {
            // Small tables arrive inline
            cmd::DATA => resp.data,
            // Empty table
            cmd::ACK_OK => return Ok(Vec::new()),
            // Large tables arrive chunked
            cmd::PREPARE_DATA => {
                if resp.data.len() < 4 {
                    return Err(SyncError::Protocol("PREPARE_DATA without size".to_string()));
                }
                let total = u32::from_le_bytes([
                    resp.data[0],
                    resp.data[1],
                    resp.data[2],
                    resp.data[3],
                ]) as usize;

                let mut buf = Vec::with_capacity(total);
                while buf.len() < total {
                    let chunk = self.read_reply().await?;
                    match chunk.command {
                        cmd::DATA => buf.extend_from_slice(&chunk.data),
                        other => {
                            return Err(SyncError::Protocol(format!(
                                "expected DATA chunk, got command {}",
                                other
                            )))
                        }
                    }
                }

                let done = self.read_reply().await?;
                if done.command != cmd::ACK_OK {
                    return Err(SyncError::Protocol(format!(
                        "expected transfer ACK, got command {}",
                        done.command
                    )));
                }
                self.send_command(cmd::FREE_DATA, &[]).await?;
                buf
            }
            cmd::ACK_ERROR => {
                return Err(SyncError::Protocol(format!(
                    "terminal refused command {}",
                    command
                )))
            }
            other => {
                return Err(SyncError::Protocol(format!(
                    "unexpected table reply: command {}",
                    other
                )))
            }
        };

        // Tables open with a u32 byte count; strip it when present
        if assembled.len() >= 4 {
            let declared = u32::from_le_bytes([
                assembled[0],
                assembled[1],
                assembled[2],
                assembled[3],
            ]) as usize;
            if declared == assembled.len() - 4 {
                assembled.drain(0..4);
            }
        }

        Ok(assembled)
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
    use chrono::{TimeZone, Utc};
    use punch_core::{EventKind, VerifyMethod};

    fn event(user: &str, y: i32, mo: u32, d: u32, h: u32, mi: u32) -> RawTerminalEvent {
        let ts = Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap();
        RawTerminalEvent {
            terminal_user_id: user.to_string(),
            timestamp: ts,
            encoded_timestamp: encode_timestamp(ts),
            kind: EventKind::CheckIn,
            verify: VerifyMethod::Fingerprint,
        }
    }

    #[tokio::test]
    async fn test_connect_ping_disconnect() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());

        let mut link = TerminalLink::connect(&terminal, Duration::from_secs(2))
            .await
            .unwrap();
        link.ping().await.unwrap();
        link.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_refused_is_unreachable() {
        let fake = FakeTerminal::start(vec![], vec![]).await;
        let port = fake.port();
        drop(fake); // listener gone, connect refused

        let terminal = sample_terminal("T-001", port);
        let err = TerminalLink::connect(&terminal, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_connect_failure());
    }

    #[tokio::test]
    async fn test_fetch_logs_filters_by_cursor_and_sorts() {
        let early = event("7", 2024, 3, 1, 9, 2);
        let late = event("7", 2024, 3, 1, 17, 5);
        // Served out of order on purpose
        let fake = FakeTerminal::start(vec![late.clone(), early.clone()], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());

        let mut link = TerminalLink::connect(&terminal, Duration::from_secs(2))
            .await
            .unwrap();

        let all = link.fetch_logs(0, 1000).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].encoded_timestamp, early.encoded_timestamp);
        assert_eq!(all[1].encoded_timestamp, late.encoded_timestamp);

        // Cursor at the first event: only the later one comes back
        let newer = link.fetch_logs(early.encoded_timestamp, 1000).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].encoded_timestamp, late.encoded_timestamp);

        link.disconnect().await;
    }

    #[tokio::test]
    async fn test_fetch_logs_caps_batch() {
        let events: Vec<_> = (0..5)
            .map(|i| event("7", 2024, 3, 1, 9, i as u32))
            .collect();
        let fake = FakeTerminal::start(events, vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());

        let mut link = TerminalLink::connect(&terminal, Duration::from_secs(2))
            .await
            .unwrap();
        let capped = link.fetch_logs(0, 3).await.unwrap();
        assert_eq!(capped.len(), 3);
        // Oldest three survive the cap
        assert!(capped.windows(2).all(|w| w[0].encoded_timestamp < w[1].encoded_timestamp));
        link.disconnect().await;
    }

    #[tokio::test]
    async fn test_fetch_logs_assembles_chunked_table() {
        // 40 records at 40 bytes each is past the fake's inline limit, so
        // the table arrives as PREPARE_DATA + DATA chunks + ACK_OK
        let events: Vec<_> = (0..40).map(|i| event("7", 2024, 3, 1, 9, i)).collect();
        let fake = FakeTerminal::start(events, vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());

        let mut link = TerminalLink::connect(&terminal, Duration::from_secs(2))
            .await
            .unwrap();
        let fetched = link.fetch_logs(0, 1000).await.unwrap();
        assert_eq!(fetched.len(), 40);
        assert!(fetched
            .windows(2)
            .all(|w| w[0].encoded_timestamp < w[1].encoded_timestamp));

        // The session survives the transfer
        link.ping().await.unwrap();
        link.disconnect().await;
    }

    #[tokio::test]
    async fn test_fetch_users() {
        let user = TerminalUser {
            uid: 3,
            user_id: "7".to_string(),
            name: "Nadia Rahman".to_string(),
            privilege: 0,
            card: 0,
        };
        let fake = FakeTerminal::start(vec![], vec![user.clone()]).await;
        let terminal = sample_terminal("T-001", fake.port());

        let mut link = TerminalLink::connect(&terminal, Duration::from_secs(2))
            .await
            .unwrap();
        let users = link.fetch_users().await.unwrap();
        assert_eq!(users, vec![user]);
        link.disconnect().await;
    }

    #[tokio::test]
    async fn test_clear_logs_empties_device() {
        let fake = FakeTerminal::start(vec![event("7", 2024, 3, 1, 9, 2)], vec![]).await;
        let terminal = sample_terminal("T-001", fake.port());

        let mut link = TerminalLink::connect(&terminal, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(link.fetch_logs(0, 100).await.unwrap().len(), 1);
        link.clear_logs().await.unwrap();
        assert!(link.fetch_logs(0, 100).await.unwrap().is_empty());
        link.disconnect().await;
    }
}
