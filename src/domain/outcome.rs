//! Job execution outcome types.

use std::fmt;

/// Outcome of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Agent exited with a success status
    Success,
    /// Agent exited non-zero, died, or could not be started
    Failure(String),
    /// Agent ran past the job timeout and was killed
    TimedOut,
    /// Pass was cancelled while the agent was running
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }

    /// Everything but an explicit success consumes an attempt.
    pub fn counts_as_failure(&self) -> bool {
        !self.is_success()
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Success => write!(f, "success"),
            JobOutcome::Failure(reason) => write!(f, "failure ({})", reason),
            JobOutcome::TimedOut => write!(f, "timed out"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}
