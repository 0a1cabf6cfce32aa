//! # Status Classification & Dedup Keys
//!
//! Pure functions at the heart of reconciliation.
//!
//! ## Classification Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Check-in Classification                              │
//! │                                                                         │
//! │         work_start           work_start + late_threshold                │
//! │             │                          │                                │
//! │  ───────────┼──────────────────────────┼──────────────────────►  time  │
//! │             │                          │                                │
//! │   ◄─── Present ───────────────────────►◄──────── Late ──────►          │
//! │                                                                         │
//! │  A check-in at or before work_start + late_threshold is Present.       │
//! │  Anything after is Late. Deterministic: no clock reads, no state.      │
//! │                                                                         │
//! │  Early leave is applied at check-OUT completion:                        │
//! │  check_out < work_end - early_leave_threshold  ⇒  EarlyLeave           │
//! │  (only downgrades Present; a Late check-in stays Late)                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AttendanceStatus;

// =============================================================================
// Reconcile Policy
// =============================================================================

/// Configured thresholds used by the reconciler.
///
/// Shift boundaries are wall-clock times compared against the punch's own
/// calendar day, so the policy works unchanged across days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Nominal work start (e.g., 09:00).
    pub work_start: NaiveTime,

    /// Nominal work end (e.g., 17:00).
    pub work_end: NaiveTime,

    /// Minutes after `work_start` before a check-in counts as late.
    pub late_threshold_mins: u32,

    /// Minutes before `work_end` a check-out must beat to count as early leave.
    pub early_leave_threshold_mins: u32,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        ReconcilePolicy {
            work_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            work_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            late_threshold_mins: 15,
            early_leave_threshold_mins: 15,
        }
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classifies a check-in punch as Present or Late.
///
/// Pure and deterministic: the result depends only on the arguments, so the
/// same (check_in, work_start, threshold) triple always yields the same
/// status.
pub fn classify_check_in(
    check_in: DateTime<Utc>,
    work_start: NaiveTime,
    late_threshold_mins: u32,
) -> AttendanceStatus {
    let deadline_secs =
        work_start.num_seconds_from_midnight() + late_threshold_mins * 60;
    let punch_secs = check_in.time().num_seconds_from_midnight();

    if punch_secs > deadline_secs {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    }
}

/// Returns true if a check-out punch counts as leaving early.
pub fn is_early_leave(
    check_out: DateTime<Utc>,
    work_end: NaiveTime,
    early_leave_threshold_mins: u32,
) -> bool {
    let cutoff_secs = work_end
        .num_seconds_from_midnight()
        .saturating_sub(early_leave_threshold_mins * 60);
    check_out.time().num_seconds_from_midnight() < cutoff_secs
}

impl ReconcilePolicy {
    /// Classifies a check-in against this policy.
    #[inline]
    pub fn classify_check_in(&self, check_in: DateTime<Utc>) -> AttendanceStatus {
        classify_check_in(check_in, self.work_start, self.late_threshold_mins)
    }

    /// Returns true if a check-out counts as leaving early under this policy.
    #[inline]
    pub fn is_early_leave(&self, check_out: DateTime<Utc>) -> bool {
        is_early_leave(check_out, self.work_end, self.early_leave_threshold_mins)
    }
}

// =============================================================================
// Dedup Key
// =============================================================================

/// Derives the idempotence key for a raw terminal event.
///
/// Built from (terminal_id, terminal_user_id, vendor-encoded timestamp).
/// The encoded timestamp has second resolution - the protocol's native
/// granularity - so re-fetching the same log range produces identical keys
/// and the upsert path updates instead of duplicating.
pub fn dedup_key(terminal_id: &str, terminal_user_id: &str, encoded_timestamp: u32) -> String {
    format!("{}:{}:{}", terminal_id, terminal_user_id, encoded_timestamp)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, 0).unwrap()
    }

    #[test]
    fn test_on_time_is_present() {
        let work_start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(
            classify_check_in(at(8, 55), work_start, 15),
            AttendanceStatus::Present
        );
        assert_eq!(
            classify_check_in(at(9, 2), work_start, 15),
            AttendanceStatus::Present
        );
    }

    #[test]
    fn test_threshold_boundary() {
        let work_start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        // Exactly at the deadline is still present; one second past is late.
        assert_eq!(
            classify_check_in(at(9, 15), work_start, 15),
            AttendanceStatus::Present
        );
        assert_eq!(
            classify_check_in(
                Utc.with_ymd_and_hms(2024, 3, 4, 9, 15, 1).unwrap(),
                work_start,
                15
            ),
            AttendanceStatus::Late
        );
        assert_eq!(
            classify_check_in(at(9, 16), work_start, 15),
            AttendanceStatus::Late
        );
    }

    #[test]
    fn test_classifier_is_deterministic() {
        let work_start = NaiveTime::from_hms_opt(8, 30, 0).unwrap();
        let punch = at(8, 47);
        let first = classify_check_in(punch, work_start, 10);
        for _ in 0..100 {
            assert_eq!(classify_check_in(punch, work_start, 10), first);
        }
    }

    #[test]
    fn test_early_leave() {
        let work_end = NaiveTime::from_hms_opt(17, 0, 0).unwrap();
        assert!(is_early_leave(at(16, 30), work_end, 15));
        // 16:45 is exactly the cutoff - not early.
        assert!(!is_early_leave(at(16, 45), work_end, 15));
        assert!(!is_early_leave(at(17, 5), work_end, 15));
    }

    #[test]
    fn test_policy_defaults() {
        let policy = ReconcilePolicy::default();
        assert_eq!(policy.classify_check_in(at(9, 2)), AttendanceStatus::Present);
        assert_eq!(policy.classify_check_in(at(9, 20)), AttendanceStatus::Late);
        assert!(!policy.is_early_leave(at(17, 5)));
    }

    #[test]
    fn test_dedup_key_shape() {
        let key = dedup_key("T-001", "7", 749_655_720);
        assert_eq!(key, "T-001:7:749655720");

        // Same inputs, same key - the idempotence contract.
        assert_eq!(key, dedup_key("T-001", "7", 749_655_720));
        assert_ne!(key, dedup_key("T-001", "7", 749_655_721));
        assert_ne!(key, dedup_key("T-002", "7", 749_655_720));
    }
}
