//! # In-Process Fake Terminal
//!
//! A minimal terminal speaking just enough of the wire protocol for tests:
//! handshake, ping, table fetches, clear and exit. Runs on an ephemeral
//! 127.0.0.1 port so link, pool and worker tests exercise the real codec
//! over a real socket.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::wire::{self, cmd};
use punch_core::{RawTerminalEvent, Terminal, TerminalStatus, TerminalUser};

const SESSION_ID: u16 = 0x1234;

/// Tables bigger than this are served chunked, the way real firmware
/// streams a large log.
const INLINE_TABLE_LIMIT: usize = 1024;
const CHUNK_SIZE: usize = 512;

struct FakeState {
    events: Vec<RawTerminalEvent>,
    users: Vec<TerminalUser>,
}

/// A fake terminal bound to an ephemeral local port.
///
/// Dropping it tears down the listener AND every open connection, so a
/// pooled session to a dropped fake really is dead.
pub struct FakeTerminal {
    port: u16,
    state: Arc<Mutex<FakeState>>,
    task: JoinHandle<()>,
    conns: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeTerminal {
    /// Starts a fake terminal serving the given log and user tables.
    pub async fn start(events: Vec<RawTerminalEvent>, users: Vec<TerminalUser>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(FakeState { events, users }));
        let conns: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let serve_state = state.clone();
        let serve_conns = conns.clone();
        let task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let conn_state = serve_state.clone();
                let handle = tokio::spawn(async move {
                    serve(stream, conn_state).await;
                });
                serve_conns.lock().unwrap().push(handle);
            }
        });

        FakeTerminal {
            port,
            state,
            task,
            conns,
        }
    }

    /// The port the fake terminal listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Appends an event to the served log (a new punch happening).
    pub fn push_event(&self, event: RawTerminalEvent) {
        self.state.lock().unwrap().events.push(event);
    }
}

impl Drop for FakeTerminal {
    fn drop(&mut self) {
        self.task.abort();
        for conn in self.conns.lock().unwrap().drain(..) {
            conn.abort();
        }
    }
}

/// A registry row pointing at a fake terminal.
pub fn sample_terminal(terminal_id: &str, port: u16) -> Terminal {
    let now = chrono::Utc::now();
    Terminal {
        id: uuid::Uuid::new_v4().to_string(),
        terminal_id: terminal_id.to_string(),
        name: format!("{} (test)", terminal_id),
        host: "127.0.0.1".to_string(),
        port,
        comm_key: 0,
        sync_interval_secs: 300,
        status: TerminalStatus::Unknown,
        last_sync_at: None,
        is_active: true,
        location: None,
        description: None,
        created_at: now,
        updated_at: now,
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<FakeState>>) {
    loop {
        let mut header = [0u8; 8];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        if header[0..4] != wire::MAGIC {
            return;
        }
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut payload = vec![0u8; len];
        if stream.read_exact(&mut payload).await.is_err() {
            return;
        }
        let Ok(packet) = wire::parse_payload(&payload) else {
            return;
        };

        let reply = match packet.command {
            cmd::CONNECT => wire::build_packet(cmd::ACK_OK, SESSION_ID, packet.reply_id, &[]),
            cmd::EXIT => {
                let bye = wire::build_packet(cmd::ACK_OK, SESSION_ID, packet.reply_id, &[]);
                let _ = stream.write_all(&bye).await;
                return;
            }
            cmd::GET_FREE_SIZES => {
                wire::build_packet(cmd::ACK_OK, SESSION_ID, packet.reply_id, &[0u8; 8])
            }
            cmd::ATTLOG_RRQ => {
                let records: Vec<u8> = {
                    let guard = state.lock().unwrap();
                    guard
                        .events
                        .iter()
                        .enumerate()
                        .flat_map(|(i, e)| wire::encode_attendance(i as u16 + 1, e))
                        .collect()
                };
                table_reply(packet.reply_id, records)
            }
            cmd::USERTEMP_RRQ => {
                let records: Vec<u8> = {
                    let guard = state.lock().unwrap();
                    guard.users.iter().flat_map(wire::encode_user).collect()
                };
                table_reply(packet.reply_id, records)
            }
            cmd::CLEAR_ATTLOG => {
                state.lock().unwrap().events.clear();
                wire::build_packet(cmd::ACK_OK, SESSION_ID, packet.reply_id, &[])
            }
            cmd::RESTART | cmd::FREE_DATA | cmd::ENABLE_DEVICE => {
                wire::build_packet(cmd::ACK_OK, SESSION_ID, packet.reply_id, &[])
            }
            _ => wire::build_packet(cmd::ACK_ERROR, SESSION_ID, packet.reply_id, &[]),
        };

        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// Builds a table response: empty tables answer ACK_OK, small tables arrive
/// as one inline DATA packet, large ones as PREPARE_DATA followed by DATA
/// chunks and a closing ACK_OK. All carry the u32 size prefix.
fn table_reply(reply_id: u16, records: Vec<u8>) -> Vec<u8> {
    if records.is_empty() {
        return wire::build_packet(cmd::ACK_OK, SESSION_ID, reply_id, &[]);
    }
    let mut data = Vec::with_capacity(4 + records.len());
    data.extend_from_slice(&(records.len() as u32).to_le_bytes());
    data.extend_from_slice(&records);

    if data.len() <= INLINE_TABLE_LIMIT {
        return wire::build_packet(cmd::DATA, SESSION_ID, reply_id, &data);
    }

    let mut frames = wire::build_packet(
        cmd::PREPARE_DATA,
        SESSION_ID,
        reply_id,
        &(data.len() as u32).to_le_bytes(),
    );
    for chunk in data.chunks(CHUNK_SIZE) {
        frames.extend_from_slice(&wire::build_packet(cmd::DATA, SESSION_ID, reply_id, chunk));
    }
    frames.extend_from_slice(&wire::build_packet(cmd::ACK_OK, SESSION_ID, reply_id, &[]));
    frames
}
