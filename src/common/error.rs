//! Error types for the verification harness
//!
//! Errors fall into two tiers. Configuration and connection errors are
//! fatal and end the process with a non-zero status. Everything raised by
//! an individual scenario step is contained by the runner and only logged.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Missing required setting '{name}'. Set {env} or pass it on the command line")]
    MissingSetting { name: String, env: String },

    // === Connection Errors ===
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Timed out after {0} ms waiting for the session to connect")]
    ConnectTimeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Socket.IO protocol error: {0}")]
    Protocol(String),

    #[error("Session disconnected: {0}")]
    Disconnected(String),

    // === Call Errors ===
    #[error("{label} ack timeout after {timeout_ms} ms")]
    AckTimeout { label: String, timeout_ms: u64 },

    #[error("{label} ack dropped by the session before it was delivered")]
    AckDropped { label: String },

    // === Step Errors ===
    #[error("Failed to extract follow-up input: {0}")]
    Extraction(String),

    #[error("Artifact '{0}' was already written in this run")]
    DuplicateArtifact(String),

    #[error("Step panicked: {0}")]
    StepPanicked(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a missing setting error naming the environment variable to set
    pub fn missing_setting(name: &str, env: &str) -> Self {
        Self::MissingSetting {
            name: name.to_string(),
            env: env.to_string(),
        }
    }

    /// Create a connect failure error for `url`
    pub fn connect_failed(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::ConnectFailed(format!("{}: {}", url, reason))
    }

    /// Create an ack timeout error for a labelled call
    pub fn ack_timeout(label: &str, timeout: Duration) -> Self {
        Self::AckTimeout {
            label: label.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create an ack dropped error for a labelled call
    pub fn ack_dropped(label: &str) -> Self {
        Self::AckDropped {
            label: label.to_string(),
        }
    }

    /// Whether this error ends the whole run rather than a single step
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::ConfigParse(_)
                | Error::MissingSetting { .. }
                | Error::ConnectFailed(_)
                | Error::ConnectTimeout(_)
        )
    }

    /// Whether this error is a call timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::AckTimeout { .. } | Error::ConnectTimeout(_))
    }
}
