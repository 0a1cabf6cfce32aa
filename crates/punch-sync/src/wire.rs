//! # Wire Protocol Codec
//!
//! Binary codec for the terminal's TCP protocol (vendor default port 4370).
//!
//! ## Packet Framing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Packet Layout                                   │
//! │                                                                         │
//! │  ┌──────────────┬───────────────┬──────────────────────────────────┐   │
//! │  │ magic (4B)   │ length (4B LE)│           payload                │   │
//! │  │ 50 50 82 7D  │ len(payload)  │                                  │   │
//! │  └──────────────┴───────────────┴──────────────────────────────────┘   │
//! │                                                                         │
//! │  payload:                                                               │
//! │  ┌──────────┬──────────┬────────────┬──────────┬────────────────────┐  │
//! │  │ cmd (2B) │ cksum(2B)│ session(2B)│ reply(2B)│       data         │  │
//! │  └──────────┴──────────┴────────────┴──────────┴────────────────────┘  │
//! │                                                                         │
//! │  All integers little-endian. The checksum is a 16-bit ones-complement  │
//! │  sum over the payload with the checksum field zeroed.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Vendor Timestamp Encoding
//! Punch times travel as a packed u32, NOT as epoch seconds:
//! ```text
//! encoded = ((year-2000)*12*31 + (month-1)*31 + (day-1)) * 86400
//!           + hour*3600 + minute*60 + second
//! ```
//! Every month is treated as 31 days, so the encoding is order-preserving
//! but not contiguous. The fetch cursor and dedup keys are defined over
//! this encoded form.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::error::{SyncError, SyncResult};
use punch_core::{EventKind, RawTerminalEvent, TerminalUser, VerifyMethod};

// =============================================================================
// Commands
// =============================================================================

/// Protocol command codes.
pub mod cmd {
    pub const CONNECT: u16 = 1000;
    pub const EXIT: u16 = 1001;
    pub const ENABLE_DEVICE: u16 = 1002;
    pub const RESTART: u16 = 1004;
    pub const AUTH: u16 = 1102;

    pub const PREPARE_DATA: u16 = 1500;
    pub const DATA: u16 = 1501;
    pub const FREE_DATA: u16 = 1502;

    pub const ACK_OK: u16 = 2000;
    pub const ACK_ERROR: u16 = 2001;
    pub const ACK_DATA: u16 = 2002;
    pub const ACK_UNAUTH: u16 = 2005;

    pub const USERTEMP_RRQ: u16 = 9;
    pub const ATTLOG_RRQ: u16 = 13;
    pub const CLEAR_ATTLOG: u16 = 15;
    pub const GET_FREE_SIZES: u16 = 50;
}

/// Magic bytes opening every TCP packet.
pub const MAGIC: [u8; 4] = [0x50, 0x50, 0x82, 0x7d];

/// Size of one attendance log record on the wire.
pub const ATT_RECORD_SIZE: usize = 40;

/// Size of one user record on the wire.
pub const USER_RECORD_SIZE: usize = 72;

// =============================================================================
// Packets
// =============================================================================

/// One decoded protocol packet (header fields + data).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: u16,
    pub session_id: u16,
    pub reply_id: u16,
    pub data: Vec<u8>,
}

/// 16-bit ones-complement sum over the payload.
///
/// The checksum field itself must be zeroed before summing.
pub fn checksum(payload: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = payload.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_le_bytes([chunk[0], chunk[1]]) as u32;
        if sum > 0xFFFF {
            sum -= 0xFFFF;
        }
    }
    if let [last] = chunks.remainder() {
        sum += *last as u32;
    }
    while sum > 0xFFFF {
        sum -= 0xFFFF;
    }
    (!sum & 0xFFFF) as u16
}

/// Builds a complete framed packet ready to write to the socket.
pub fn build_packet(command: u16, session_id: u16, reply_id: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + data.len());
    payload.extend_from_slice(&command.to_le_bytes());
    payload.extend_from_slice(&[0, 0]); // checksum placeholder
    payload.extend_from_slice(&session_id.to_le_bytes());
    payload.extend_from_slice(&reply_id.to_le_bytes());
    payload.extend_from_slice(data);

    let sum = checksum(&payload);
    payload[2..4].copy_from_slice(&sum.to_le_bytes());

    let mut packet = Vec::with_capacity(8 + payload.len());
    packet.extend_from_slice(&MAGIC);
    packet.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    packet.extend_from_slice(&payload);
    packet
}

/// Parses a payload (the bytes after the 8-byte frame header).
///
/// Verifies the checksum; a mismatch means a corrupt or desynchronized
/// stream and surfaces as a protocol error.
pub fn parse_payload(payload: &[u8]) -> SyncResult<Packet> {
    if payload.len() < 8 {
        return Err(SyncError::Protocol(format!(
            "payload too short: {} bytes",
            payload.len()
        )));
    }

    let command = u16::from_le_bytes([payload[0], payload[1]]);
    let expected = u16::from_le_bytes([payload[2], payload[3]]);
    let session_id = u16::from_le_bytes([payload[4], payload[5]]);
    let reply_id = u16::from_le_bytes([payload[6], payload[7]]);

    let mut zeroed = payload.to_vec();
    zeroed[2] = 0;
    zeroed[3] = 0;
    let actual = checksum(&zeroed);
    if actual != expected {
        return Err(SyncError::Protocol(format!(
            "checksum mismatch: expected {:#06x}, computed {:#06x}",
            expected, actual
        )));
    }

    Ok(Packet {
        command,
        session_id,
        reply_id,
        data: payload[8..].to_vec(),
    })
}

// =============================================================================
// Timestamps
// =============================================================================

/// Encodes a timestamp into the vendor's packed u32 form.
pub fn encode_timestamp(ts: DateTime<Utc>) -> u32 {
    let year = ts.year().max(2000) as u32;
    let days = (year - 2000) * 12 * 31 + (ts.month() - 1) * 31 + (ts.day() - 1);
    days * 86_400 + ts.hour() * 3_600 + ts.minute() * 60 + ts.second()
}

/// Decodes the vendor's packed u32 timestamp.
///
/// Returns `None` for encodings that name an impossible date (e.g. a
/// day-31 slot in a 30-day month); callers skip such records.
pub fn decode_timestamp(raw: u32) -> Option<DateTime<Utc>> {
    let secs = raw % 86_400;
    let days = raw / 86_400;

    let second = secs % 60;
    let minute = (secs / 60) % 60;
    let hour = secs / 3_600;

    let day = days % 31 + 1;
    let months = days / 31;
    let month = months % 12 + 1;
    let year = months / 12 + 2000;

    Utc.with_ymd_and_hms(year as i32, month, day, hour, minute, second)
        .single()
}

// =============================================================================
// Auth
// =============================================================================

/// Derives the AUTH command payload from the communication key.
///
/// Bit-reversal of the key, session offset, then the vendor's fixed XOR
/// obfuscation pass.
pub fn auth_key(comm_key: u32, session_id: u16) -> [u8; 4] {
    let mut k: u32 = 0;
    for i in 0..32 {
        k <<= 1;
        if comm_key & (1 << i) != 0 {
            k |= 1;
        }
    }
    k = k.wrapping_add(session_id as u32);

    let b = k.to_le_bytes();
    let b = [b[0] ^ b'Z', b[1] ^ b'K', b[2] ^ b'S', b[3] ^ b'O'];
    // swap 16-bit halves
    let b = [b[2], b[3], b[0], b[1]];

    let ticks = 50u8;
    [b[0] ^ ticks, b[1] ^ ticks, ticks, b[3] ^ ticks]
}

// =============================================================================
// Records
// =============================================================================

/// Decodes one 40-byte attendance log record.
///
/// Layout: uid u16, user_id 24B NUL-padded, verify u8, timestamp u32,
/// punch state u8, 8B reserved.
pub fn decode_attendance(rec: &[u8]) -> SyncResult<RawTerminalEvent> {
    if rec.len() != ATT_RECORD_SIZE {
        return Err(SyncError::Protocol(format!(
            "attendance record is {} bytes, expected {}",
            rec.len(),
            ATT_RECORD_SIZE
        )));
    }

    let terminal_user_id = trimmed_string(&rec[2..26]);
    let verify = verify_from_byte(rec[26]);
    let encoded = u32::from_le_bytes([rec[27], rec[28], rec[29], rec[30]]);
    let kind = kind_from_byte(rec[31]);

    let timestamp = decode_timestamp(encoded)
        .ok_or_else(|| SyncError::Protocol(format!("invalid packed timestamp {}", encoded)))?;

    Ok(RawTerminalEvent {
        terminal_user_id,
        timestamp,
        encoded_timestamp: encoded,
        kind,
        verify,
    })
}

/// Encodes one attendance log record (the mirror of [`decode_attendance`]).
pub fn encode_attendance(uid: u16, event: &RawTerminalEvent) -> [u8; ATT_RECORD_SIZE] {
    let mut rec = [0u8; ATT_RECORD_SIZE];
    rec[0..2].copy_from_slice(&uid.to_le_bytes());
    write_padded(&mut rec[2..26], &event.terminal_user_id);
    rec[26] = verify_to_byte(event.verify);
    rec[27..31].copy_from_slice(&event.encoded_timestamp.to_le_bytes());
    rec[31] = match event.kind {
        EventKind::CheckIn => 0,
        EventKind::CheckOut => 1,
        EventKind::Unspecified => 255,
    };
    rec
}

/// Decodes one 72-byte user record.
///
/// Layout: uid u16, privilege u16, password 8B, name 24B, card u32,
/// group u8, 7B reserved, user_id 24B.
pub fn decode_user(rec: &[u8]) -> SyncResult<TerminalUser> {
    if rec.len() != USER_RECORD_SIZE {
        return Err(SyncError::Protocol(format!(
            "user record is {} bytes, expected {}",
            rec.len(),
            USER_RECORD_SIZE
        )));
    }

    Ok(TerminalUser {
        uid: u16::from_le_bytes([rec[0], rec[1]]),
        privilege: u16::from_le_bytes([rec[2], rec[3]]),
        name: trimmed_string(&rec[12..36]),
        card: u32::from_le_bytes([rec[36], rec[37], rec[38], rec[39]]),
        user_id: trimmed_string(&rec[48..72]),
    })
}

/// Encodes one user record (the mirror of [`decode_user`]).
pub fn encode_user(user: &TerminalUser) -> [u8; USER_RECORD_SIZE] {
    let mut rec = [0u8; USER_RECORD_SIZE];
    rec[0..2].copy_from_slice(&user.uid.to_le_bytes());
    rec[2..4].copy_from_slice(&user.privilege.to_le_bytes());
    write_padded(&mut rec[12..36], &user.name);
    rec[36..40].copy_from_slice(&user.card.to_le_bytes());
    write_padded(&mut rec[48..72], &user.user_id);
    rec
}

fn kind_from_byte(b: u8) -> EventKind {
    match b {
        0 => EventKind::CheckIn,
        1 => EventKind::CheckOut,
        // Many firmware revisions report a constant state byte here
        _ => EventKind::Unspecified,
    }
}

fn verify_from_byte(b: u8) -> VerifyMethod {
    match b {
        0 => VerifyMethod::Password,
        1 => VerifyMethod::Fingerprint,
        2 => VerifyMethod::Card,
        15 => VerifyMethod::Face,
        _ => VerifyMethod::Unknown,
    }
}

fn verify_to_byte(v: VerifyMethod) -> u8 {
    match v {
        VerifyMethod::Password => 0,
        VerifyMethod::Fingerprint => 1,
        VerifyMethod::Card => 2,
        VerifyMethod::Face => 15,
        VerifyMethod::Unknown => 200,
    }
}

/// Reads a NUL-padded fixed-width string field.
fn trimmed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Writes a string into a NUL-padded fixed-width field, truncating.
fn write_padded(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(field.len());
    field[..n].copy_from_slice(&bytes[..n]);
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_round_trip() {
        let packet = build_packet(cmd::CONNECT, 0, 0, &[]);
        assert_eq!(&packet[0..4], &MAGIC);
        let len = u32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]) as usize;
        assert_eq!(len, packet.len() - 8);

        let parsed = parse_payload(&packet[8..]).unwrap();
        assert_eq!(parsed.command, cmd::CONNECT);
        assert_eq!(parsed.session_id, 0);
        assert_eq!(parsed.reply_id, 0);
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_packet_with_data_round_trip() {
        let packet = build_packet(cmd::AUTH, 0x1234, 7, &[0xde, 0xad, 0xbe, 0xef, 0x01]);
        let parsed = parse_payload(&packet[8..]).unwrap();
        assert_eq!(parsed.command, cmd::AUTH);
        assert_eq!(parsed.session_id, 0x1234);
        assert_eq!(parsed.reply_id, 7);
        assert_eq!(parsed.data, vec![0xde, 0xad, 0xbe, 0xef, 0x01]);
    }

    #[test]
    fn test_corrupt_payload_rejected() {
        let mut packet = build_packet(cmd::CONNECT, 0, 0, &[1, 2, 3]);
        // Flip a data byte: the checksum no longer matches
        let last = packet.len() - 1;
        packet[last] ^= 0xFF;
        let err = parse_payload(&packet[8..]).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn test_short_payload_rejected() {
        assert!(parse_payload(&[0x50, 0x50]).is_err());
    }

    #[test]
    fn test_timestamp_round_trip() {
        for (y, mo, d, h, mi, s) in [
            (2024, 3, 1, 9, 2, 0),
            (2024, 12, 31, 23, 59, 59),
            (2000, 1, 1, 0, 0, 0),
            (2031, 7, 15, 12, 30, 45),
        ] {
            let ts = Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap();
            let decoded = decode_timestamp(encode_timestamp(ts)).unwrap();
            assert_eq!(decoded, ts);
        }
    }

    #[test]
    fn test_timestamp_encoding_is_order_preserving() {
        let a = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(encode_timestamp(a) < encode_timestamp(b));
    }

    #[test]
    fn test_impossible_date_decodes_to_none() {
        // Day slot 31 of February (month index 1, day index 30)
        let raw = ((24 * 12 * 31) + 31 + 30) * 86_400;
        assert!(decode_timestamp(raw).is_none());
    }

    #[test]
    fn test_attendance_record_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 2, 0).unwrap();
        let event = RawTerminalEvent {
            terminal_user_id: "7".to_string(),
            timestamp: ts,
            encoded_timestamp: encode_timestamp(ts),
            kind: EventKind::CheckIn,
            verify: VerifyMethod::Fingerprint,
        };

        let rec = encode_attendance(3, &event);
        let decoded = decode_attendance(&rec).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_unknown_punch_state_is_unspecified() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 2, 0).unwrap();
        let event = RawTerminalEvent {
            terminal_user_id: "7".to_string(),
            timestamp: ts,
            encoded_timestamp: encode_timestamp(ts),
            kind: EventKind::Unspecified,
            verify: VerifyMethod::Card,
        };
        let mut rec = encode_attendance(1, &event);
        rec[31] = 99; // firmware-specific state byte
        assert_eq!(decode_attendance(&rec).unwrap().kind, EventKind::Unspecified);
    }

    #[test]
    fn test_user_record_round_trip() {
        let user = TerminalUser {
            uid: 3,
            user_id: "7".to_string(),
            name: "Nadia Rahman".to_string(),
            privilege: 0,
            card: 123456,
        };
        let decoded = decode_user(&encode_user(&user)).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn test_wrong_record_size_rejected() {
        assert!(decode_attendance(&[0u8; 39]).is_err());
        assert!(decode_user(&[0u8; 71]).is_err());
    }

    #[test]
    fn test_auth_key_varies_with_session() {
        let a = auth_key(12345, 0x0001);
        let b = auth_key(12345, 0x0002);
        assert_ne!(a, b);
        // Byte 2 carries the fixed tick marker
        assert_eq!(a[2], 50);
    }
}
