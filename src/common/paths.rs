//! Configuration and output paths
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/beacon-probe/`
//! - macOS: `~/Library/Application Support/beacon-probe/`
//! - Windows: `%APPDATA%\beacon-probe\`

use std::path::PathBuf;

/// Application name used for platform directories
const APP_NAME: &str = "beacon-probe";

/// Output directory used when neither config nor environment names one
const DEFAULT_OUTPUT_DIR: &str = "output";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Default artifact directory, relative to the current working directory
pub fn default_output_dir() -> PathBuf {
    std::env::current_dir()
        .map(|cwd| cwd.join(DEFAULT_OUTPUT_DIR))
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR))
}
