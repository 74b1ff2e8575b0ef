//! Admission controller over the state store.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};

use super::{Admission, BlockReason, CheckReport, GlobalAdmission, Reservation};
use crate::domain::{ApprovalGrant, AttemptRecord, AttemptStatus, JobKey, JobOutcome};
use crate::error::Result;
use crate::notify::{Notification, Notifier};
use crate::store::{StateSet, StateStore};

/// Limits enforced by the controller.
#[derive(Debug, Clone)]
pub struct AdmissionLimits {
    /// Failed attempts allowed per key between successes
    pub pr_limit: u32,
    /// Started jobs allowed before approval is required
    pub global_limit: u64,
    /// Delay after a success before the key is admitted again
    pub cooldown: Duration,
    /// Lifetime of an approval grant
    pub approval_duration: Duration,
    /// Age after which a reservation is considered abandoned
    pub reservation_ttl: Duration,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            pr_limit: 3,
            global_limit: 50,
            cooldown: Duration::hours(24),
            approval_duration: Duration::hours(24),
            reservation_ttl: Duration::hours(2),
        }
    }
}

/// Single writer of attempt records, the global counter and approval grants.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    store: StateStore,
    limits: AdmissionLimits,
    notifier: Notifier,
}

impl AdmissionController {
    pub fn new(store: StateStore, limits: AdmissionLimits, notifier: Notifier) -> Self {
        Self {
            store,
            limits,
            notifier,
        }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    /// May the batch run at all?
    pub async fn admit_global(&self) -> Result<GlobalAdmission> {
        self.admit_global_at(Utc::now()).await
    }

    pub async fn admit_global_at(&self, now: DateTime<Utc>) -> Result<GlobalAdmission> {
        let (decision, notes) = self
            .store
            .with_lock_async(|state| {
                let mut notes = Vec::new();
                let decision = self.gate(state, now, false, &mut notes);
                Ok((decision, notes))
            })
            .await?;

        if let GlobalAdmission::RequiresApproval { total_runs, limit } = &decision {
            info!("Global limit reached ({}/{}), approval required", total_runs, limit);
        }
        self.send_all(&notes).await;
        Ok(decision)
    }

    /// Check the global gate and the key, and reserve the key, in one
    /// critical section.
    pub async fn try_admit_and_reserve(&self, key: &JobKey) -> Result<Admission> {
        self.try_admit_and_reserve_at(key, Utc::now()).await
    }

    pub async fn try_admit_and_reserve_at(&self, key: &JobKey, now: DateTime<Utc>) -> Result<Admission> {
        let (admission, notes) = self
            .store
            .with_lock_async(|state| {
                let mut notes = Vec::new();

                if let GlobalAdmission::RequiresApproval { total_runs, limit } = self.gate(state, now, true, &mut notes) {
                    return Ok((Admission::Blocked(BlockReason::RequiresApproval { total_runs, limit }), notes));
                }

                let record = state.attempt_mut(key);
                if let Some(reason) = self.evaluate_item(record, now) {
                    return Ok((Admission::Blocked(reason), notes));
                }

                if let Some(stale) = record.reserved_at {
                    warn!("Taking over abandoned reservation for {} (reserved at {})", key, stale.to_rfc3339());
                }

                record.status = AttemptStatus::Active;
                record.reservations += 1;
                record.reserved_at = Some(now);

                Ok((
                    Admission::Reserved(Reservation {
                        key: key.clone(),
                        reserved_at: now,
                        sequence: record.reservations,
                    }),
                    notes,
                ))
            })
            .await?;

        match &admission {
            Admission::Reserved(r) => debug!("Reserved {} (reservation #{})", key, r.sequence),
            Admission::Blocked(reason) => info!("Admission denied for {}: {}", key, reason),
        }
        self.send_all(&notes).await;
        Ok(admission)
    }

    /// Record the outcome of a started job and release its reservation.
    ///
    /// Every recorded outcome counts once against the global budget.
    pub async fn record(&self, key: &JobKey, outcome: &JobOutcome) -> Result<AttemptRecord> {
        self.record_at(key, outcome, Utc::now()).await
    }

    pub async fn record_at(&self, key: &JobKey, outcome: &JobOutcome, now: DateTime<Utc>) -> Result<AttemptRecord> {
        let pr_limit = self.limits.pr_limit;
        let (record, notes) = self
            .store
            .with_lock_async(|state| {
                let mut notes = Vec::new();
                let record = state.attempt_mut(key);
                record.reserved_at = None;
                record.last_attempt_at = Some(now);

                if outcome.is_success() {
                    record.status = AttemptStatus::CoolingDown;
                    record.last_success_at = Some(now);
                    record.success_baseline = record.attempt_count;
                    record.exhausted_notified = false;
                } else {
                    record.attempt_count += 1;
                    if record.is_exhausted(pr_limit) {
                        record.status = AttemptStatus::Blocked;
                        if !record.exhausted_notified {
                            record.exhausted_notified = true;
                            notes.push(Notification::ItemExhausted {
                                key: key.clone(),
                                attempts: record.effective_attempts(),
                                limit: pr_limit,
                            });
                        }
                    }
                }

                let snapshot = record.clone();
                state.global.increment(now);
                self.gate(state, now, false, &mut notes);
                Ok((snapshot, notes))
            })
            .await?;

        info!(
            "Recorded {} for {} (attempts {}/{}, status {})",
            outcome,
            key,
            record.effective_attempts(),
            pr_limit,
            record.status
        );
        self.send_all(&notes).await;
        Ok(record)
    }

    /// Drop a reservation without consuming an attempt.
    pub fn release_reservation(&self, key: &JobKey) -> Result<()> {
        self.store.with_lock(|state| {
            if let Some(record) = state.attempts.get_mut(&key.to_string()) {
                record.reserved_at = None;
            }
            Ok(())
        })
    }

    /// Replace any prior grant with a fresh one.
    pub fn grant_approval(&self, approver: &str) -> Result<ApprovalGrant> {
        self.grant_approval_at(approver, Utc::now())
    }

    pub fn grant_approval_at(&self, approver: &str, now: DateTime<Utc>) -> Result<ApprovalGrant> {
        let grant = ApprovalGrant::new(approver, now, self.limits.approval_duration);
        self.store.with_lock(|state| {
            state.approval = Some(grant.clone());
            // A later crossing after this grant expires notifies again
            state.global.limit_notified = false;
            Ok(())
        })?;
        info!("Approval granted by {} until {}", approver, grant.expires_at.to_rfc3339());
        Ok(grant)
    }

    /// Read-only admission view, used by `check` and dry runs.
    pub fn check(&self, key: &JobKey) -> Result<CheckReport> {
        self.check_at(key, Utc::now())
    }

    pub fn check_at(&self, key: &JobKey, now: DateTime<Utc>) -> Result<CheckReport> {
        self.store.with_lock(|state| {
            let global = self.global_decision(state, now, true);
            let record = state
                .attempt(key)
                .cloned()
                .unwrap_or_else(|| AttemptRecord::new(key.clone()));

            let blocked = match &global {
                GlobalAdmission::RequiresApproval { total_runs, limit } => Some(BlockReason::RequiresApproval {
                    total_runs: *total_runs,
                    limit: *limit,
                }),
                GlobalAdmission::Allowed { .. } => self.evaluate_item(&record, now),
            };

            Ok(CheckReport { global, blocked, record })
        })
    }

    /// Snapshot of every durable record.
    pub fn status(&self) -> Result<StateSet> {
        self.store.load()
    }

    /// Global decision without side effects.
    ///
    /// With `count_in_flight`, live reservations count as runs already
    /// started so overlapping passes cannot jointly exceed the limit.
    fn global_decision(&self, state: &StateSet, now: DateTime<Utc>, count_in_flight: bool) -> GlobalAdmission {
        let limit = self.limits.global_limit;
        let total_runs = state.global.total_runs;
        let in_flight = if count_in_flight {
            state.live_reservations(now, self.limits.reservation_ttl) as u64
        } else {
            0
        };

        if total_runs + in_flight < limit {
            return GlobalAdmission::Allowed {
                total_runs,
                limit,
                approved_by: None,
            };
        }

        match state.active_grant(now) {
            Some(grant) => GlobalAdmission::Allowed {
                total_runs,
                limit,
                approved_by: Some(grant.granted_by.clone()),
            },
            None => GlobalAdmission::RequiresApproval { total_runs, limit },
        }
    }

    /// Global decision that queues the limit notification once per crossing.
    fn gate(
        &self,
        state: &mut StateSet,
        now: DateTime<Utc>,
        count_in_flight: bool,
        notes: &mut Vec<Notification>,
    ) -> GlobalAdmission {
        let decision = self.global_decision(state, now, count_in_flight);
        let crossed = state.global.total_runs >= self.limits.global_limit;

        if !decision.is_allowed() && crossed && !state.global.limit_notified {
            state.global.limit_notified = true;
            notes.push(Notification::GlobalLimitReached {
                total_runs: state.global.total_runs,
                limit: self.limits.global_limit,
                approval: self.limits.approval_duration,
            });
        }
        decision
    }

    fn evaluate_item(&self, record: &AttemptRecord, now: DateTime<Utc>) -> Option<BlockReason> {
        if record.is_exhausted(self.limits.pr_limit) {
            return Some(BlockReason::Exhausted {
                attempts: record.effective_attempts(),
                limit: self.limits.pr_limit,
            });
        }

        if record.in_cooldown(now, self.limits.cooldown)
            && let Some(at) = record.last_success_at
        {
            return Some(BlockReason::CoolingDown {
                until: at + self.limits.cooldown,
            });
        }

        if record.has_live_reservation(now, self.limits.reservation_ttl)
            && let Some(since) = record.reserved_at
        {
            return Some(BlockReason::InProgress { since });
        }

        None
    }

    async fn send_all(&self, notes: &[Notification]) {
        for note in notes {
            self.notifier.notify(note).await;
        }
    }
}
