//! CLI command definitions
//!
//! Defines the clap commands and global flags for the harness.

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::common::config::Overrides;

/// Flags accepted by every command
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Configuration file (default: the per-user config file, if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Server host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short, global = true)]
    pub port: Option<u16>,

    /// Shared secret sent with every request
    #[arg(long, short, global = true)]
    pub key: Option<String>,

    /// Player uuid for player-scoped queries
    #[arg(long, global = true)]
    pub player_uuid: Option<String>,

    /// Player name for player-scoped queries
    #[arg(long, global = true)]
    pub player_name: Option<String>,

    /// Artifact directory
    #[arg(long, short, global = true)]
    pub output: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl GlobalArgs {
    /// Configuration overrides carried by these flags
    pub fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            key: self.key.clone(),
            player_uuid: self.player_uuid.clone(),
            player_name: self.player_name.clone(),
            output: self.output.clone(),
            record_failures: false,
            log_file: self.log_file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the verification scenario and write one artifact per result
    Run {
        /// YAML scenario to run instead of the built-in one
        #[arg(long, short)]
        scenario: Option<PathBuf>,

        /// Write an artifact with the error for every failed step
        #[arg(long)]
        record_failures: bool,
    },

    /// Send a single event and print its acknowledgment
    Call {
        /// Event name (e.g., "get_status")
        event: String,

        /// JSON payload (default: {})
        #[arg(long)]
        payload: Option<String>,

        /// Label used in log lines
        #[arg(long)]
        label: Option<String>,

        /// Acknowledgment timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Do not add the shared key to the payload
        #[arg(long)]
        no_key: bool,
    },

    /// List artifacts in the output directory
    #[command(alias = "ls")]
    Artifacts,
}
