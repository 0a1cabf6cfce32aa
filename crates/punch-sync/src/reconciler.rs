//! # Event Reconciler
//!
//! Turns a batch of raw terminal events into attendance record inserts,
//! updates and quarantine entries. Pure: operates entirely on preloaded
//! data and touches neither the database nor the network.
//!
//! ## Pairing Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Per Event (in timestamp order)                         │
//! │                                                                         │
//! │  dedup_key already known?  ──► skip (re-fetch of a committed event)    │
//! │                                                                         │
//! │  no employee mapping?      ──► quarantine, keep going                   │
//! │                                                                         │
//! │  check-in   ──► open record exists for (employee, day)? skip           │
//! │                 else new record, status = classify(check_in)            │
//! │                                                                         │
//! │  check-out  ──► completes the day's open record;                        │
//! │                 early leave only downgrades Present.                    │
//! │                 no open record? the punch opens one instead of          │
//! │                 being dropped                                           │
//! │                                                                         │
//! │  unspecified ─► check-out if the day has an earlier open record,        │
//! │                 check-in otherwise                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cursor candidate is the max encoded timestamp over ALL fetched
//! events - quarantined ones included, since they are committed in the
//! same transaction.

use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use punch_core::{
    dedup_key, AttendanceRecord, AttendanceStatus, EventKind, QuarantinedEvent, RawTerminalEvent,
    ReconcilePolicy, TerminalUser,
};

/// Everything the reconciler needs, preloaded by the worker.
pub struct ReconcileInput<'a> {
    /// Business id of the terminal the events came from.
    pub terminal_id: &'a str,

    /// Raw events fetched this cycle.
    pub events: &'a [RawTerminalEvent],

    /// terminal_user_id → employee_id for this terminal.
    pub mappings: &'a HashMap<String, String>,

    /// Records already stored under this batch's dedup keys.
    pub existing: &'a HashMap<String, AttendanceRecord>,

    /// This terminal's records still missing a check-out.
    pub open_records: &'a [AttendanceRecord],

    /// The terminal's user table, for quarantine display names.
    pub users: &'a [TerminalUser],

    /// Classification thresholds.
    pub policy: &'a ReconcilePolicy,
}

/// What one reconciliation pass produced.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Brand new attendance records.
    pub inserts: Vec<AttendanceRecord>,

    /// Stored records completed or reclassified this pass.
    pub updates: Vec<AttendanceRecord>,

    /// Events with no employee mapping.
    pub quarantined: Vec<QuarantinedEvent>,

    /// Cursor candidate: newest encoded timestamp seen in the batch.
    pub max_encoded_timestamp: Option<u32>,
}

impl ReconcileOutcome {
    /// Records touched (inserts + updates).
    pub fn written(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }
}

enum Origin {
    Existing,
    New,
}

struct Working {
    record: AttendanceRecord,
    origin: Origin,
    dirty: bool,
}

/// Reconciles one fetched batch against preloaded store state.
pub fn reconcile(input: ReconcileInput<'_>) -> ReconcileOutcome {
    let mut events: Vec<&RawTerminalEvent> = input.events.iter().collect();
    events.sort_by_key(|e| e.encoded_timestamp);

    let names: HashMap<&str, &str> = input
        .users
        .iter()
        .map(|u| (u.user_id.as_str(), u.name.as_str()))
        .collect();

    // Open records become working copies; completed ones only need their
    // dedup keys for duplicate detection.
    let mut working: Vec<Working> = input
        .open_records
        .iter()
        .map(|r| Working {
            record: r.clone(),
            origin: Origin::Existing,
            dirty: false,
        })
        .collect();

    let mut known_keys: HashSet<String> = input.existing.keys().cloned().collect();
    for w in &working {
        known_keys.insert(w.record.dedup_key.clone());
    }

    // (employee_id, day) → index into `working` of the day's open record
    let mut open_index: HashMap<(String, NaiveDate), usize> = HashMap::new();
    for (i, w) in working.iter().enumerate() {
        let key = (
            w.record.employee_id.clone(),
            w.record.check_in_time.date_naive(),
        );
        open_index.insert(key, i);
    }

    let mut outcome = ReconcileOutcome::default();

    for event in events {
        outcome.max_encoded_timestamp = Some(
            outcome
                .max_encoded_timestamp
                .map_or(event.encoded_timestamp, |m| m.max(event.encoded_timestamp)),
        );

        let key = dedup_key(
            input.terminal_id,
            &event.terminal_user_id,
            event.encoded_timestamp,
        );
        if known_keys.contains(&key) {
            // Already committed in an earlier cycle (or earlier in this batch)
            continue;
        }

        let Some(employee_id) = input.mappings.get(&event.terminal_user_id) else {
            debug!(
                terminal_id = %input.terminal_id,
                terminal_user_id = %event.terminal_user_id,
                "Quarantining unmapped event"
            );
            outcome.quarantined.push(QuarantinedEvent {
                terminal_id: input.terminal_id.to_string(),
                terminal_user_id: event.terminal_user_id.clone(),
                terminal_user_name: names
                    .get(event.terminal_user_id.as_str())
                    .map(|n| n.to_string()),
                event_timestamp: event.timestamp,
                kind: event.kind,
            });
            continue;
        };

        let day = event.timestamp.date_naive();
        let open_key = (employee_id.clone(), day);

        let is_check_out = match event.kind {
            EventKind::CheckIn => false,
            EventKind::CheckOut => true,
            // Firmware that reports a constant state byte: infer from the
            // day's open record
            EventKind::Unspecified => open_index
                .get(&open_key)
                .map(|&i| working[i].record.check_in_time < event.timestamp)
                .unwrap_or(false),
        };

        if is_check_out {
            if let Some(&i) = open_index.get(&open_key) {
                let w = &mut working[i];
                if w.record.check_in_time <= event.timestamp {
                    w.record.check_out_time = Some(event.timestamp);
                    if w.record.status == AttendanceStatus::Present
                        && input.policy.is_early_leave(event.timestamp)
                    {
                        w.record.status = AttendanceStatus::EarlyLeave;
                    }
                    w.record.updated_at = Utc::now();
                    w.dirty = true;
                    known_keys.insert(key);
                    open_index.remove(&open_key);
                    continue;
                }
            }
            // An orphan check-out still opens a record so the punch survives
        } else if open_index.contains_key(&open_key) {
            // Second opening punch for the same day: nothing to add
            known_keys.insert(key);
            continue;
        }

        let now = Utc::now();
        let record = AttendanceRecord {
            id: Uuid::new_v4().to_string(),
            dedup_key: key.clone(),
            employee_id: employee_id.clone(),
            check_in_time: event.timestamp,
            check_out_time: None,
            source_terminal_id: input.terminal_id.to_string(),
            status: input.policy.classify_check_in(event.timestamp),
            verify_method: event.verify,
            created_at: now,
            updated_at: now,
        };
        working.push(Working {
            record,
            origin: Origin::New,
            dirty: true,
        });
        known_keys.insert(key);
        open_index.insert(open_key, working.len() - 1);
    }

    for w in working {
        if !w.dirty {
            continue;
        }
        match w.origin {
            Origin::New => outcome.inserts.push(w.record),
            Origin::Existing => outcome.updates.push(w.record),
        }
    }

    outcome
}

// =============================================================================
// Unit Tests
// =============================================================================
