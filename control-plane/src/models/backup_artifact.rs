use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// A single timestamped database dump on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}
