//! Core domain types for prsweep.
//!
//! Identity of a unit of work, the durable records kept per key and
//! globally, discovered candidates, and job outcomes.

pub mod approval;
pub mod attempt;
pub mod candidate;
pub mod job_key;
pub mod outcome;

pub use approval::ApprovalGrant;
pub use attempt::{AttemptRecord, AttemptStatus, GlobalRunCounter};
pub use candidate::{CandidateItem, sort_oldest_first};
pub use job_key::{JobKey, escape_name};
pub use outcome::JobOutcome;
