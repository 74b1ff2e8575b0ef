//! Per-key attempt records and the global run counter.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::JobKey;

/// Admission status of a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Eligible, subject to attempt and reservation checks
    Active,
    /// Attempt budget exhausted
    Blocked,
    /// Succeeded recently; waits out the cooldown period
    CoolingDown,
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttemptStatus::Active => "active",
            AttemptStatus::Blocked => "blocked",
            AttemptStatus::CoolingDown => "cooling_down",
        };
        f.write_str(s)
    }
}

/// Durable admission history for one key. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub key: JobKey,

    /// Lifetime number of failed attempts. Never reset.
    pub attempt_count: u32,

    /// Value of `attempt_count` at the most recent success
    #[serde(default)]
    pub success_baseline: u32,

    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,

    /// Number of reservations ever taken for this key
    #[serde(default)]
    pub reservations: u64,

    /// Set while a pass holds the key; cleared by record/release
    #[serde(default)]
    pub reserved_at: Option<DateTime<Utc>>,

    /// Exhaustion notification already sent for the current budget
    #[serde(default)]
    pub exhausted_notified: bool,
}

impl AttemptRecord {
    /// A zeroed record, as created on first admission check.
    pub fn new(key: JobKey) -> Self {
        Self {
            key,
            attempt_count: 0,
            success_baseline: 0,
            last_attempt_at: None,
            last_success_at: None,
            status: AttemptStatus::Active,
            reservations: 0,
            reserved_at: None,
            exhausted_notified: false,
        }
    }

    /// Failed attempts counted against the current budget.
    pub fn effective_attempts(&self) -> u32 {
        self.attempt_count.saturating_sub(self.success_baseline)
    }

    pub fn is_exhausted(&self, pr_limit: u32) -> bool {
        self.effective_attempts() >= pr_limit
    }

    /// True while a recent success still holds the key back.
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        if self.status != AttemptStatus::CoolingDown {
            return false;
        }
        match self.last_success_at {
            Some(at) => now - at < cooldown,
            None => false,
        }
    }

    /// Whether another pass currently holds a reservation.
    pub fn has_live_reservation(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.reserved_at.is_some_and(|at| now - at < ttl)
    }
}

/// Global throughput counter shared by every key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRunCounter {
    /// Started jobs recorded so far. Monotonic.
    pub total_runs: u64,
    pub window_started_at: Option<DateTime<Utc>>,
    /// Global-limit notification already sent for the current crossing
    #[serde(default)]
    pub limit_notified: bool,
}

impl GlobalRunCounter {
    pub fn increment(&mut self, now: DateTime<Utc>) {
        if self.window_started_at.is_none() {
            self.window_started_at = Some(now);
        }
        self.total_runs += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> JobKey {
        JobKey::new("acme/widgets", 1)
    }

    #[test]
    fn test_new_record_is_zeroed() {
        let record = AttemptRecord::new(key());
        assert_eq!(record.attempt_count, 0);
        assert_eq!(record.status, AttemptStatus::Active);
        assert!(record.last_success_at.is_none());
        assert!(record.reserved_at.is_none());
    }

    #[test]
    fn test_effective_attempts_uses_baseline() {
        let mut record = AttemptRecord::new(key());
        record.attempt_count = 5;
        record.success_baseline = 3;
        assert_eq!(record.effective_attempts(), 2);
        assert!(!record.is_exhausted(3));
        record.attempt_count = 6;
        assert!(record.is_exhausted(3));
    }

    #[test]
    fn test_cooldown_window() {
        let now = Utc::now();
        let mut record = AttemptRecord::new(key());
        record.status = AttemptStatus::CoolingDown;
        record.last_success_at = Some(now);

        let cooldown = Duration::hours(24);
        assert!(record.in_cooldown(now + Duration::hours(23), cooldown));
        assert!(!record.in_cooldown(now + Duration::hours(24), cooldown));
    }

    #[test]
    fn test_cooldown_requires_cooling_status() {
        let now = Utc::now();
        let mut record = AttemptRecord::new(key());
        record.last_success_at = Some(now);
        assert!(!record.in_cooldown(now, Duration::hours(24)));
    }

    #[test]
    fn test_live_reservation_expires() {
        let now = Utc::now();
        let mut record = AttemptRecord::new(key());
        assert!(!record.has_live_reservation(now, Duration::hours(2)));
        record.reserved_at = Some(now);
        assert!(record.has_live_reservation(now + Duration::minutes(30), Duration::hours(2)));
        assert!(!record.has_live_reservation(now + Duration::hours(3), Duration::hours(2)));
    }

    #[test]
    fn test_counter_starts_window_on_first_run() {
        let now = Utc::now();
        let mut counter = GlobalRunCounter::default();
        assert!(counter.window_started_at.is_none());
        counter.increment(now);
        counter.increment(now + Duration::minutes(5));
        assert_eq!(counter.total_runs, 2);
        assert_eq!(counter.window_started_at, Some(now));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&AttemptStatus::CoolingDown).unwrap();
        assert_eq!(json, "\"cooling_down\"");
    }
}
