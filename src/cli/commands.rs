//! CLI command definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// prsweep - periodic pull request sweeper with admission limits
#[derive(Parser, Debug)]
#[command(name = "prsweep")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one pass: discover, admit, process, record
    Run {
        /// Show which candidates would run without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Only query this source (owner or owner/repo)
        #[arg(long, value_name = "NAME")]
        single_source: Option<String>,

        /// Consider at most this many candidates
        #[arg(long, value_name = "N")]
        max_items: Option<usize>,
    },

    /// List discovered candidates, oldest first
    List {
        /// Only query this source (owner or owner/repo)
        #[arg(long, value_name = "NAME")]
        single_source: Option<String>,
    },

    /// Show the admission decision for one key
    Check {
        /// Key in owner/repo#number form
        key: String,
    },

    /// Manually record an outcome for a key
    Record {
        /// Key in owner/repo#number form
        key: String,

        /// Outcome to record
        #[arg(value_enum)]
        outcome: RecordOutcome,
    },

    /// Grant approval to continue past the global run limit
    Approve {
        /// Who is approving
        approver: String,
    },

    /// Print attempt records, the global counter and approval state
    Status,

    /// Remove a leftover workspace and clear its reservation
    Cleanup {
        /// Key in owner/repo#number form
        key: String,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Success,
    Failure,
}
