//! Result sink: one timestamped JSON artifact per result
//!
//! Artifact files look like
//! ```text
//! {
//!   "timestamp": "2024-01-03T12:00:00.000Z",
//!   "data": { ... } | null
//! }
//! ```
//! and are written to a temporary file first, then renamed into place.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{Error, Result};

/// Qualifier used when an identifier is absent
pub const FALLBACK_QUALIFIER: &str = "unknown";

/// Extension of artifact files
const ARTIFACT_EXTENSION: &str = "json";

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`
///
/// An absent identifier becomes [`FALLBACK_QUALIFIER`].
pub fn sanitize(name: Option<&str>) -> String {
    match name {
        Some(name) => name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect(),
        None => FALLBACK_QUALIFIER.to_string(),
    }
}

/// `<prefix>_<qualifier>.json`, or `<prefix>.json` without a qualifier
pub fn artifact_name(prefix: &str, qualifier: Option<&str>) -> String {
    match qualifier {
        Some(q) => format!("{}_{}.{}", prefix, sanitize(Some(q)), ARTIFACT_EXTENSION),
        None => format!("{}.{}", prefix, ARTIFACT_EXTENSION),
    }
}

/// Current time as an ISO-8601 UTC timestamp with milliseconds
pub fn capture_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Persisted record of one result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub timestamp: String,
    /// Result value; `null` when the acknowledgment carried nothing
    pub data: Value,
    /// Why the step failed, for failure artifacts only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Writes artifacts into one output directory
#[derive(Debug)]
pub struct ResultSink {
    dir: PathBuf,
    written: HashSet<String>,
}

impl ResultSink {
    /// Create `dir` if missing, otherwise remove everything inside it
    pub async fn prepare(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {
                let mut entries = tokio::fs::read_dir(&dir).await?;
                let mut removed = 0usize;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    if entry.file_type().await?.is_dir() {
                        tokio::fs::remove_dir_all(&path).await?;
                    } else {
                        tokio::fs::remove_file(&path).await?;
                    }
                    removed += 1;
                }
                tracing::debug!(dir = %dir.display(), removed, "Reset output directory");
            }
            Ok(_) => {
                return Err(Error::Config(format!(
                    "Output path '{}' exists and is not a directory",
                    dir.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&dir).await?;
                tracing::debug!(dir = %dir.display(), "Created output directory");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            dir,
            written: HashSet::new(),
        })
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names written so far in this run
    pub fn written(&self) -> impl Iterator<Item = &str> {
        self.written.iter().map(String::as_str)
    }

    /// Write the result of a step; `None` is recorded as `null`
    pub async fn write(&mut self, name: &str, data: Option<&Value>) -> Result<PathBuf> {
        let record = ArtifactRecord {
            timestamp: capture_timestamp(),
            data: data.cloned().unwrap_or(Value::Null),
            error: None,
        };
        self.persist(name, &record).await
    }

    /// Write a failure record for a step that produced no result
    pub async fn write_failure(&mut self, name: &str, error: &str) -> Result<PathBuf> {
        let record = ArtifactRecord {
            timestamp: capture_timestamp(),
            data: Value::Null,
            error: Some(error.to_string()),
        };
        self.persist(name, &record).await
    }

    async fn persist(&mut self, name: &str, record: &ArtifactRecord) -> Result<PathBuf> {
        validate_name(name)?;
        if self.written.contains(name) {
            return Err(Error::DuplicateArtifact(name.to_string()));
        }

        let mut json = serde_json::to_string_pretty(record)?;
        json.push('\n');

        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.dir.join(name);
        let staging = self.dir.join(format!(".{}.tmp", name));

        let staged = async {
            tokio::fs::write(&staging, json.as_bytes()).await?;
            tokio::fs::rename(&staging, &target).await
        }
        .await;
        if let Err(e) = staged {
            // A partial staging file must not outlive the failed write
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        self.written.insert(name.to_string());
        tracing::info!(path = %target.display(), "Wrote artifact");
        Ok(target)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(Error::Config(format!("Invalid artifact name '{}'", name)));
    }
    Ok(())
}

/// Read one artifact back
pub async fn read_artifact(path: &Path) -> Result<ArtifactRecord> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
    Ok(serde_json::from_str(&content)?)
}

/// All artifacts in `dir`, sorted by file name
///
/// Staging files and non-JSON files are skipped.
pub async fn list_artifacts(dir: &Path) -> Result<Vec<(PathBuf, ArtifactRecord)>> {
    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| Error::FileRead {
        path: dir.display().to_string(),
        error: e.to_string(),
    })?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        let is_json = path.extension().and_then(|e| e.to_str()) == Some(ARTIFACT_EXTENSION);
        if !hidden && is_json {
            paths.push(path);
        }
    }
    paths.sort();

    let mut artifacts = Vec::with_capacity(paths.len());
    for path in paths {
        let record = read_artifact(&path).await?;
        artifacts.push((path, record));
    }
    Ok(artifacts)
}
