//! Command-line surface — §6.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cmdguard", version, about = "A setuid-safe batch command runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v debug, -vv trace). Overrides `global.log_level`.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity to warnings and errors only.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, verify, and run every group's commands in dependency order.
    Run {
        /// Path to the TOML configuration file.
        #[arg(short = 'c', long = "config")]
        config: PathBuf,

        /// Restrict execution to this single group; every other group is
        /// skipped, not failed.
        #[arg(short = 'g', long = "group")]
        group: Option<String>,

        /// Directory of recorded hash entries.
        #[arg(short = 'd', long = "hash-dir")]
        hash_dir: PathBuf,

        /// Identifier substituted into `__RUNNER_RUN_ID`.
        #[arg(short = 'r', long = "run-id")]
        run_id: String,

        /// Perform load/verify/expand/analyze, print the resolved plan,
        /// and exit without spawning any child process.
        #[arg(long)]
        dry_run: bool,
    },

    /// Record hashes for `verify_files`, `include`d templates, and resolved
    /// command binaries.
    Record {
        #[arg(short = 'c', long = "config")]
        config: PathBuf,

        /// Directory to write recorded hash entries into.
        #[arg(short = 'o', long = "hash-dir")]
        hash_dir: PathBuf,

        /// Overwrite any existing entry for the same target.
        #[arg(long)]
        force: bool,
    },

    /// Verify every referenced file and binary against recorded hashes
    /// without running anything.
    Verify {
        #[arg(short = 'c', long = "config")]
        config: PathBuf,

        #[arg(short = 'd', long = "hash-dir")]
        hash_dir: PathBuf,
    },
}
