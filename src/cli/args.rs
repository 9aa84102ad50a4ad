//! Command-line argument parsing for Patcher
//!
//! This module defines the CLI structure using clap derive macros,
//! providing commands for fetching patch reports, inspecting the local
//! snapshot cache, and managing keychain credentials.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::app::SortKey;
use crate::auth::CredentialKey;

/// Patcher - Jamf Pro patch compliance reports
#[derive(Parser, Debug)]
#[command(
    name = "patcher",
    version,
    about = "Fetch and cache patch compliance data from Jamf Pro",
    long_about = "Collects patch software title summaries from the Jamf Pro API with bounded
concurrency, automatic token refresh and retry logic, and keeps timestamped snapshots locally."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache directory path
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch patch data for every software title
    Fetch(FetchArgs),

    /// Inspect or clear cached snapshots
    Cache(CacheArgs),

    /// Manage stored API credentials
    Auth(AuthArgs),

    /// Reset cached data and/or credentials
    Reset(ResetArgs),
}

/// Arguments for the fetch command
#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Maximum concurrent API requests
    #[arg(short, long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Do not write a snapshot of the results
    #[arg(long)]
    pub no_cache: bool,

    /// Include iOS version compliance from managed mobile devices
    #[arg(long)]
    pub ios: bool,

    /// Write the records as JSON to this file
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,

    /// Sort records by column
    #[arg(short, long, value_name = "COLUMN", value_parser = parse_sort_key)]
    pub sort: Option<SortKey>,

    /// Omit titles released within the last 48 hours
    #[arg(long)]
    pub omit: bool,
}

/// Arguments for cache management
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache management actions
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show the most recent snapshot
    Latest {
        /// Ignore snapshots older than this (e.g. "12h", "7days")
        #[arg(long, value_name = "DURATION", value_parser = humantime_serde::re::humantime::parse_duration)]
        max_age: Option<Duration>,
    },

    /// List every cached snapshot
    List,

    /// Delete every cached snapshot
    Clear,
}

/// Arguments for authentication management
#[derive(Args, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub action: AuthAction,
}

/// Authentication actions
#[derive(Subcommand, Debug)]
pub enum AuthAction {
    /// Store the Jamf Pro URL and API client credentials in the keychain
    Setup {
        /// Replace credentials that are already stored
        #[arg(short, long)]
        force: bool,
    },

    /// Show which credentials are stored
    Status,

    /// Remove stored credentials
    Clear {
        /// Remove only this credential (url, client-id, client-secret)
        #[arg(long, value_name = "KEY", value_parser = parse_credential_key)]
        key: Option<CredentialKey>,
    },
}

/// Arguments for the reset command
#[derive(Args, Debug)]
pub struct ResetArgs {
    #[arg(value_enum)]
    pub target: ResetTarget,
}

/// What the reset command removes
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    Cache,
    Credentials,
    All,
}

fn parse_sort_key(value: &str) -> Result<SortKey, String> {
    value.parse()
}

fn parse_credential_key(value: &str) -> Result<CredentialKey, String> {
    value.parse()
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Level requested by verbosity flags, if any were given
    pub fn verbosity_level(&self) -> Option<tracing::Level> {
        if self.global.quiet {
            Some(tracing::Level::ERROR)
        } else if self.global.very_verbose {
            Some(tracing::Level::DEBUG)
        } else if self.global.verbose {
            Some(tracing::Level::INFO)
        } else {
            None
        }
    }

    /// Get the logging level from global arguments, falling back to `default`
    pub fn log_level_or(&self, default: tracing::Level) -> tracing::Level {
        self.verbosity_level().unwrap_or(default)
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        self.log_level_or(tracing::Level::WARN)
    }
}

impl FetchArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == Some(0) {
            return Err("Concurrency must be greater than 0".to_string());
        }

        Ok(())
    }
}
