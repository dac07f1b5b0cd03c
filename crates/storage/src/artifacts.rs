//! Catalog of recorded answer audio.
//!
//! Recordings are named `answer_<millis>.mp3`, and the embedded timestamp is
//! the only ordering the catalog relies on.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::time::to_millis;
use tracing::{debug, warn};

use crate::repository::StorageError;

const PREFIX: &str = "answer_";
const EXTENSION: &str = ".mp3";

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Reserve a name for a recording made at `at`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be written.
    async fn record_artifact(&self, at: DateTime<Utc>) -> Result<String, StorageError>;

    /// All recordings, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn list_artifacts(&self) -> Result<Vec<String>, StorageError>;

    /// Drop every recording and return how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    async fn clear_artifacts(&self) -> Result<usize, StorageError>;
}

#[must_use]
pub fn artifact_name(millis: i64) -> String {
    format!("{PREFIX}{millis}{EXTENSION}")
}

/// Timestamp embedded in a recording name, `None` for foreign files.
#[must_use]
pub fn artifact_timestamp(name: &str) -> Option<i64> {
    name.strip_prefix(PREFIX)?
        .strip_suffix(EXTENSION)?
        .parse()
        .ok()
}

/// First free name at or after `at`, bumping one millisecond per collision.
pub(crate) fn unique_artifact_name(at: DateTime<Utc>, taken: impl Fn(&str) -> bool) -> String {
    let mut millis = to_millis(at);
    loop {
        let name = artifact_name(millis);
        if !taken(&name) {
            return name;
        }
        millis += 1;
    }
}

/// Keep recording names only and sort them by embedded timestamp.
pub(crate) fn chronological(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut stamped: Vec<(i64, String)> = names
        .into_iter()
        .filter_map(|name| artifact_timestamp(&name).map(|ts| (ts, name)))
        .collect();
    stamped.sort();
    stamped.into_iter().map(|(_, name)| name).collect()
}

//
// ─── FILESYSTEM ────────────────────────────────────────────────────────────────
//

/// Catalog backed by a directory of audio files.
///
/// `record_artifact` only reserves the name; the upload layer writes the bytes
/// to [`FsArtifactRepository::path_for`].
#[derive(Debug, Clone)]
pub struct FsArtifactRepository {
    dir: PathBuf,
}

fn io(e: std::io::Error) -> StorageError {
    StorageError::Io(e.to_string())
}

impl FsArtifactRepository {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    async fn file_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(io(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(io)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl ArtifactRepository for FsArtifactRepository {
    async fn record_artifact(&self, at: DateTime<Utc>) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(io)?;
        let existing = self.file_names().await?;
        let name = unique_artifact_name(at, |candidate| existing.iter().any(|n| n == candidate));
        tokio::fs::File::create(self.path_for(&name))
            .await
            .map_err(io)?;
        debug!(artifact = %name, "reserved recording");
        Ok(name)
    }

    async fn list_artifacts(&self) -> Result<Vec<String>, StorageError> {
        Ok(chronological(self.file_names().await?))
    }

    async fn clear_artifacts(&self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for name in self.list_artifacts().await? {
            match tokio::fs::remove_file(self.path_for(&name)).await {
                Ok(()) => removed += 1,
                // One stuck file must not block a new exam.
                Err(e) => warn!(artifact = %name, error = %e, "failed to delete recording"),
            }
        }
        Ok(removed)
    }
}
