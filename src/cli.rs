//! CLI arguments and subcommands for node-nanny.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "node-nanny",
    about = "Per-node memory guardian that terminates the heaviest users' processes",
    long_about = "Per-node memory guardian.\n\n\
                  Polls running processes, sums memory usage per user and, once total usage \
                  has stayed above the configured limit for longer than the grace period, \
                  terminates processes of the heaviest users that are not whitelisted.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level (overrides log_level from the config file, default: info)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Path to the SQLite database
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Hostname recorded for this node (defaults to the system hostname)
    #[arg(long)]
    pub hostname: Option<String>,

    /// Signal sent to terminated processes (e.g. SIGTERM, SIGKILL)
    #[arg(long)]
    pub kill_signal: Option<String>,

    /// Do not send notification emails
    #[arg(long)]
    pub no_email: bool,

    /// Parallel processing threads (0 = auto)
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Maximum number of processes to scan
    #[arg(long)]
    pub max_processes: Option<usize>,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Monitor memory usage and terminate processes of the heaviest users
    Scan {
        /// Memory limit in percent of system memory
        #[arg(short = 'M', long = "max-mem")]
        max_mem: Option<f64>,

        /// Users at or below this usage in percent are never targeted
        #[arg(short = 'm', long = "min-mem")]
        min_mem: Option<f64>,

        /// Seconds usage may stay above the limit before processes are killed
        #[arg(short = 'w', long)]
        wait: Option<u64>,

        /// Seconds between scans
        #[arg(short = 'f', long)]
        frequency: Option<u64>,
    },

    /// Kill all processes of a user now
    Kill {
        /// User whose processes are killed
        #[arg(short = 'u', long)]
        user: String,

        /// Do not record or email a notification
        #[arg(short = 'q', long)]
        quiet: bool,
    },

    /// Show notification history, newest first
    History {
        /// Only show notifications for this user
        #[arg(short = 'u', long)]
        user: Option<String>,
    },

    /// Show active whitelist entries
    Whitelist,

    /// Whitelist a user on a node or globally
    Add {
        #[arg(short = 'u', long)]
        user: String,

        /// Whitelist duration in seconds (defaults to 100 years)
        #[arg(short = 'd', long)]
        duration: Option<i64>,

        /// Node to whitelist on (defaults to this host)
        #[arg(short = 'n', long, conflicts_with = "global")]
        node: Option<String>,

        /// Whitelist on every node
        #[arg(short = 'g', long)]
        global: bool,
    },

    /// Remove a user from the whitelist
    Remove {
        #[arg(short = 'u', long)]
        user: String,

        /// Node to remove the entry from (defaults to this host)
        #[arg(short = 'n', long, conflicts_with = "global")]
        node: Option<String>,

        /// End every active entry of the user
        #[arg(short = 'g', long)]
        global: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Check /proc access, privileges and the database
    Check,
}
