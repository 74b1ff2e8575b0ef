//! Per-pass counters and report.

use std::fmt;

use colored::*;

use crate::admission::BlockReason;
use crate::domain::{JobKey, JobOutcome};

/// What happened to one candidate during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemDisposition {
    /// Admission said no
    Blocked(BlockReason),
    /// Workspace left over from an earlier pass
    InProgress,
    /// Workspace could not be created; recorded as a failure
    WorkspaceFailed(String),
    /// Agent ran and the outcome was recorded
    Completed(JobOutcome),
    /// Admissible, but a dry run does not execute
    WouldRun,
    /// Not reached this pass
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub key: JobKey,
    pub disposition: ItemDisposition,
}

/// Counts by outcome for one pass, plus the per-item trail in processing order.
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub discovered: usize,
    pub admitted: usize,
    pub blocked: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub deferred: usize,
    /// The global gate stopped the pass
    pub requires_approval: bool,
    /// The pass deadline or an interrupt stopped the pass
    pub cancelled: bool,
    pub dry_run: bool,
    pub items: Vec<ItemResult>,
}

impl PassSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub(crate) fn push(&mut self, key: &JobKey, disposition: ItemDisposition) {
        match &disposition {
            ItemDisposition::Blocked(_) => self.blocked += 1,
            ItemDisposition::InProgress => self.in_progress += 1,
            ItemDisposition::WorkspaceFailed(_) => self.failed += 1,
            ItemDisposition::Completed(outcome) => match outcome {
                JobOutcome::Success => self.succeeded += 1,
                JobOutcome::TimedOut => self.timed_out += 1,
                JobOutcome::Failure(_) => self.failed += 1,
                JobOutcome::Cancelled => {
                    self.failed += 1;
                    self.cancelled = true;
                }
            },
            ItemDisposition::WouldRun => {}
            ItemDisposition::Deferred => self.deferred += 1,
        }
        self.items.push(ItemResult {
            key: key.clone(),
            disposition,
        });
    }

    /// Every outcome that consumed an attempt without succeeding.
    pub fn failures(&self) -> usize {
        self.failed + self.timed_out
    }

    /// Keys in the order they were handled, filtered by disposition.
    pub fn keys_where(&self, pred: impl Fn(&ItemDisposition) -> bool) -> Vec<JobKey> {
        self.items
            .iter()
            .filter(|r| pred(&r.disposition))
            .map(|r| r.key.clone())
            .collect()
    }

    /// Single line for the log file.
    pub fn one_line(&self) -> String {
        format!(
            "discovered={} admitted={} blocked={} in_progress={} succeeded={} failed={} timed_out={} deferred={}{}{}{}",
            self.discovered,
            self.admitted,
            self.blocked,
            self.in_progress,
            self.succeeded,
            self.failed,
            self.timed_out,
            self.deferred,
            if self.requires_approval { " requires_approval" } else { "" },
            if self.cancelled { " cancelled" } else { "" },
            if self.dry_run { " dry_run" } else { "" },
        )
    }
}

impl fmt::Display for ItemDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemDisposition::Blocked(reason) => write!(f, "blocked: {}", reason),
            ItemDisposition::InProgress => write!(f, "workspace already exists"),
            ItemDisposition::WorkspaceFailed(e) => write!(f, "workspace failed: {}", e),
            ItemDisposition::Completed(outcome) => write!(f, "{}", outcome),
            ItemDisposition::WouldRun => write!(f, "would run"),
            ItemDisposition::Deferred => write!(f, "deferred"),
        }
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = if self.dry_run { "Dry run" } else { "Pass summary" };
        writeln!(f, "{}", title.bold())?;

        for item in &self.items {
            let line = item.disposition.to_string();
            let line = match &item.disposition {
                ItemDisposition::Completed(JobOutcome::Success) | ItemDisposition::WouldRun => line.green(),
                ItemDisposition::Completed(_) | ItemDisposition::WorkspaceFailed(_) => line.red(),
                ItemDisposition::InProgress => line.yellow(),
                ItemDisposition::Blocked(_) | ItemDisposition::Deferred => line.dimmed(),
            };
            writeln!(f, "  {:<40} {}", item.key.to_string(), line)?;
        }

        writeln!(f, "  discovered:  {}", self.discovered)?;
        writeln!(f, "  admitted:    {}", self.admitted)?;
        writeln!(f, "  blocked:     {}", self.blocked)?;
        if self.in_progress > 0 {
            writeln!(f, "  in progress: {}", self.in_progress.to_string().yellow())?;
        }
        writeln!(f, "  succeeded:   {}", self.succeeded.to_string().green())?;
        writeln!(f, "  failed:      {}", self.failed.to_string().red())?;
        writeln!(f, "  timed out:   {}", self.timed_out.to_string().red())?;
        write!(f, "  deferred:    {}", self.deferred)?;
        if self.requires_approval {
            write!(f, "\n{}", "Global run limit reached: approval required".yellow().bold())?;
        }
        if self.cancelled {
            write!(f, "\n{}", "Pass cancelled before completion".yellow())?;
        }
        Ok(())
    }
}
