use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::BackupArtifact;
use crate::services::backup::RestoreState;
use crate::services::maintenance::MaintenanceStatus;

/// Phrase both restore confirmations must equal.
pub const RESTORE_CONFIRMATION: &str = "RESTORE";

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct MaintenanceResponse {
    pub enabled: bool,
    /// `enabled`, `disabled`, or `unknown` when the store is unreachable.
    pub status: &'static str,
}

impl From<MaintenanceStatus> for MaintenanceResponse {
    fn from(status: MaintenanceStatus) -> Self {
        let label = match status {
            MaintenanceStatus::Enabled => "enabled",
            MaintenanceStatus::Disabled => "disabled",
            MaintenanceStatus::Unknown => "unknown",
        };
        Self {
            enabled: status == MaintenanceStatus::Enabled,
            status: label,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    /// `None` when the store is unreachable.
    pub active_sessions: Option<u64>,
    /// Always true: stale sessions are counted until the next flush.
    pub approximate: bool,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub sessions_flushed: u64,
}

#[derive(Debug, Serialize)]
pub struct BackupListResponse {
    pub supported: bool,
    pub backups: Vec<BackupArtifact>,
}

#[derive(Debug, Serialize)]
pub struct BackupCreatedResponse {
    pub backup: BackupArtifact,
    pub pruned: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RestoreRequest {
    #[validate(length(min = 1, message = "Backup file is required"))]
    pub backup: String,

    #[validate(must_match(other = "confirm2", message = "Confirmations do not match"))]
    pub confirm: String,

    pub confirm2: String,
}

impl RestoreRequest {
    pub fn confirmed(&self) -> bool {
        self.confirm == RESTORE_CONFIRMATION && self.confirm2 == RESTORE_CONFIRMATION
    }
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub backup: String,
    pub state: RestoreState,
    pub transitions: Vec<RestoreState>,
    pub maintenance_enabled: bool,
    pub message: String,
}

const AUDIT_PAGE_DEFAULT: i64 = 50;
const AUDIT_PAGE_MAX: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQuery {
    /// Clamped `(limit, offset)`.
    pub fn bounds(&self) -> (i64, i64) {
        (
            self.limit
                .unwrap_or(AUDIT_PAGE_DEFAULT)
                .clamp(1, AUDIT_PAGE_MAX),
            self.offset.unwrap_or(0).max(0),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub store_healthy: bool,
    pub maintenance: MaintenanceResponse,
    pub sessions: SessionsResponse,
    pub backups_supported: bool,
    pub recent_backups: Vec<BackupArtifact>,
}
