//! On-disk backup artifacts: naming, listing, retention and the path guard.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

use crate::models::BackupArtifact;

const NAME_PREFIX: &str = "td_backup_";
const NAME_EXTENSION: &str = ".sql";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("not a backup file name: {0}")]
    InvalidName(String),

    #[error("backup must be inside the backup directory")]
    OutsideBackupDir,

    #[error("backup not found: {0}")]
    NotFound(String),
}

pub fn artifact_name(at: DateTime<Utc>) -> String {
    format!("{}{}{}", NAME_PREFIX, at.format(TIMESTAMP_FORMAT), NAME_EXTENSION)
}

/// `td_backup_YYYYMMDD_HHMMSS.sql` with a real calendar timestamp.
pub fn is_artifact_name(name: &str) -> bool {
    let Some(stamp) = name
        .strip_prefix(NAME_PREFIX)
        .and_then(|rest| rest.strip_suffix(NAME_EXTENSION))
    else {
        return false;
    };

    let shape_ok = stamp.len() == 15
        && stamp
            .char_indices()
            .all(|(i, c)| if i == 8 { c == '_' } else { c.is_ascii_digit() });

    shape_ok && NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).is_ok()
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackupDirectory {
    root: PathBuf,
}

impl BackupDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub(crate) async fn describe(path: PathBuf) -> std::io::Result<Option<BackupArtifact>> {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            return Ok(None);
        };
        if !is_artifact_name(&file_name) {
            return Ok(None);
        }
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Ok(None);
        }
        Ok(Some(BackupArtifact {
            file_name,
            path,
            size_bytes: meta.len(),
            modified_at: DateTime::<Utc>::from(meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)),
        }))
    }

    /// All artifacts, newest first. A missing directory lists as empty.
    pub async fn list(&self) -> std::io::Result<Vec<BackupArtifact>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            match Self::describe(entry.path()).await {
                Ok(Some(artifact)) => artifacts.push(artifact),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = ?entry.path(), error = %e, "Skipping unreadable backup"),
            }
        }

        artifacts.sort_by(|a, b| {
            b.modified_at
                .cmp(&a.modified_at)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        Ok(artifacts)
    }

    pub async fn prune(&self, retention_days: u64) -> std::io::Result<PruneReport> {
        self.prune_at(retention_days, Utc::now()).await
    }

    /// Deletes artifacts whose modification time is older than the retention
    /// window. Per-file failures are collected, not raised.
    pub async fn prune_at(
        &self,
        retention_days: u64,
        now: DateTime<Utc>,
    ) -> std::io::Result<PruneReport> {
        let cutoff = now - chrono::Duration::days(retention_days as i64);
        let mut report = PruneReport::default();

        for artifact in self.list().await? {
            if artifact.modified_at >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(&artifact.path).await {
                Ok(()) => {
                    tracing::info!(file = %artifact.file_name, "Pruned expired backup");
                    report.removed.push(artifact.file_name);
                }
                Err(e) => {
                    tracing::warn!(file = %artifact.file_name, error = %e, "Failed to prune backup");
                    report.failed.push(artifact.file_name);
                }
            }
        }

        Ok(report)
    }

    /// The single path-traversal guard. Accepts a bare file name or a path,
    /// and only returns artifacts that follow the naming convention and
    /// resolve to a file directly inside the backup directory.
    pub async fn resolve(&self, requested: &str) -> Result<BackupArtifact, ArtifactError> {
        let requested_path = Path::new(requested.trim());
        let file_name = requested_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArtifactError::InvalidName(requested.to_string()))?;

        if !is_artifact_name(file_name) {
            return Err(ArtifactError::InvalidName(file_name.to_string()));
        }

        let candidate = if requested_path.components().count() == 1 {
            self.root.join(file_name)
        } else {
            requested_path.to_path_buf()
        };

        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|_| ArtifactError::NotFound(file_name.to_string()))?;
        let resolved = match tokio::fs::canonicalize(&candidate).await {
            Ok(path) => path,
            Err(_) if candidate.parent().map_or(false, |p| p != self.root.as_path()) => {
                return Err(ArtifactError::OutsideBackupDir)
            }
            Err(_) => return Err(ArtifactError::NotFound(file_name.to_string())),
        };

        if resolved.parent() != Some(root.as_path()) {
            return Err(ArtifactError::OutsideBackupDir);
        }

        // Symlinks inside the directory must point at a conforming name too.
        let resolved_name = resolved
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if !is_artifact_name(resolved_name) {
            return Err(ArtifactError::InvalidName(resolved_name.to_string()));
        }

        match Self::describe(resolved).await {
            Ok(Some(artifact)) => Ok(artifact),
            _ => Err(ArtifactError::NotFound(file_name.to_string())),
        }
    }
}
