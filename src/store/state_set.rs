//! In-memory view of the full durable record set.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{ApprovalGrant, AttemptRecord, GlobalRunCounter, JobKey};

/// Everything the store persists, as handed to a `with_lock` closure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSet {
    /// Attempt records keyed by `JobKey` display form
    pub attempts: BTreeMap<String, AttemptRecord>,
    pub global: GlobalRunCounter,
    /// Latest grant, possibly expired
    pub approval: Option<ApprovalGrant>,
}

impl StateSet {
    pub fn attempt(&self, key: &JobKey) -> Option<&AttemptRecord> {
        self.attempts.get(&key.to_string())
    }

    /// Record for `key`, creating a zeroed one if absent.
    pub fn attempt_mut(&mut self, key: &JobKey) -> &mut AttemptRecord {
        self.attempts
            .entry(key.to_string())
            .or_insert_with(|| AttemptRecord::new(key.clone()))
    }

    /// Grant that is still valid at `now`.
    pub fn active_grant(&self, now: DateTime<Utc>) -> Option<&ApprovalGrant> {
        self.approval.as_ref().filter(|g| g.is_active(now))
    }

    /// Keys currently held by some pass.
    pub fn live_reservations(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        self.attempts
            .values()
            .filter(|r| r.has_live_reservation(now, ttl))
            .count()
    }
}
