//! Admission decision types.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::{AttemptRecord, JobKey};

/// Result of the batch-level gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalAdmission {
    Allowed {
        total_runs: u64,
        limit: u64,
        /// Approver, when only a grant lets the batch through
        approved_by: Option<String>,
    },
    RequiresApproval { total_runs: u64, limit: u64 },
}

impl GlobalAdmission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GlobalAdmission::Allowed { .. })
    }
}

/// Why a key may not run now. Not an error: expected control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// Attempt budget used up
    Exhausted { attempts: u32, limit: u32 },
    /// Succeeded recently
    CoolingDown { until: DateTime<Utc> },
    /// Another pass holds a reservation
    InProgress { since: DateTime<Utc> },
    /// Global run limit reached without an active grant
    RequiresApproval { total_runs: u64, limit: u64 },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Exhausted { attempts, limit } => {
                write!(f, "attempt limit reached ({}/{})", attempts, limit)
            }
            BlockReason::CoolingDown { until } => write!(f, "cooling down until {}", until.to_rfc3339()),
            BlockReason::InProgress { since } => write!(f, "reserved by another pass since {}", since.to_rfc3339()),
            BlockReason::RequiresApproval { total_runs, limit } => {
                write!(f, "global limit reached ({}/{}), approval required", total_runs, limit)
            }
        }
    }
}

/// Proof that a key was reserved for this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub key: JobKey,
    pub reserved_at: DateTime<Utc>,
    /// Sequence number of this reservation for the key
    pub sequence: u64,
}

/// Outcome of `try_admit_and_reserve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Reserved(Reservation),
    Blocked(BlockReason),
}

impl Admission {
    pub fn is_reserved(&self) -> bool {
        matches!(self, Admission::Reserved(_))
    }
}

/// Read-only admission view for one key.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub global: GlobalAdmission,
    /// `None` when the key itself is eligible
    pub blocked: Option<BlockReason>,
    pub record: AttemptRecord,
}

impl CheckReport {
    pub fn is_admissible(&self) -> bool {
        self.blocked.is_none()
    }
}
