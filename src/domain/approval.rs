//! Manual approval grant that lifts the global run limit for a while.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// At most one grant is stored; writing a new one replaces the old.
/// Expiry is checked at read time, the record itself is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGrant {
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ApprovalGrant {
    pub fn new(granted_by: impl Into<String>, granted_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            granted_by: granted_by.into(),
            granted_at,
            expires_at: granted_at + duration,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Time left before expiry, if any.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_active(now) {
            Some(self.expires_at - now)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_accepted_just_before_expiry() {
        let t = Utc::now();
        let grant = ApprovalGrant::new("alice", t, Duration::hours(24));
        assert!(grant.is_active(t + Duration::hours(23) + Duration::minutes(59)));
    }

    #[test]
    fn test_grant_rejected_just_after_expiry() {
        let t = Utc::now();
        let grant = ApprovalGrant::new("alice", t, Duration::hours(24));
        assert!(!grant.is_active(t + Duration::hours(24) + Duration::minutes(1)));
        assert!(grant.remaining(t + Duration::hours(25)).is_none());
    }

    #[test]
    fn test_remaining() {
        let t = Utc::now();
        let grant = ApprovalGrant::new("alice", t, Duration::hours(24));
        assert_eq!(grant.remaining(t + Duration::hours(20)), Some(Duration::hours(4)));
    }
}
