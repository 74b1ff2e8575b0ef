//! prsweep - periodic pull request sweeper
//!
//! Each pass discovers recently updated pull requests, admits them against
//! per-item and global run limits, runs an external agent in an isolated
//! workspace per item, and records the outcome in a small durable store
//! shared by every invocation.

pub mod admission;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod notify;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod workspace;

pub use error::{Result, SweepError};
