//! CLI module for prsweep - command-line interface and subcommands.
//!
//! One subcommand per operator action: run a pass, list candidates,
//! inspect or adjust admission state, clean up leftover workspaces.

pub mod commands;

pub use commands::Cli;
