//! CLI interface for Warden
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Warden agent engine
///
/// Drives a task to completion with an LLM and a set of sandboxed tools.
/// Destructive actions always ask before they run.
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute an instruction
    Run {
        /// The instruction to carry out
        instruction: String,

        /// Override the step budget
        #[arg(long, value_name = "N")]
        max_steps: Option<usize>,

        /// Override the sandbox directory
        #[arg(long, value_name = "DIR")]
        sandbox: Option<PathBuf>,
    },

    /// List the registered tools
    Tools,

    /// Dry-run the sandbox policy
    Check {
        #[command(subcommand)]
        target: CheckTarget,
    },

    /// Run system diagnostics
    Doctor,
}

/// What to check against the sandbox
#[derive(Subcommand, Debug)]
pub enum CheckTarget {
    /// Validate a sandbox-relative path
    Path {
        /// Path relative to the sandbox root
        path: String,
    },

    /// Validate a terminal command line
    Command {
        /// The full command line, quoted
        line: String,
    },
}
