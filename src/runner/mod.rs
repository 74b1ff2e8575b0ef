//! Runs the external agent against one workspace.

mod job_runner;

pub use job_runner::{AgentConfig, JobRunner};
