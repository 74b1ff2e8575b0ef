//! Admission control.
//!
//! Answers "may the batch run at all?" and "may this key run now?", and
//! reserves a key before any workspace exists for it. Every decision is
//! taken inside a single `StateStore::with_lock` critical section, so the
//! global check and the per-key reservation cannot be split by another pass.

mod controller;
mod decision;

pub use controller::{AdmissionController, AdmissionLimits};
pub use decision::{Admission, BlockReason, CheckReport, GlobalAdmission, Reservation};
