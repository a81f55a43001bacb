//! Audit record model - append-only trail of privileged actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const USER_AGENT_MAX_LEN: usize = 255;

/// Audit action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    LoginSuccess,
    LoginFailure,
    Logout,
    MaintenanceToggle,
    LogoutAllSessions,
    RestoreDb,
    BackupCreated,
    BackupsPruned,
    UserCreated,
    UserDeactivated,
    UserActivated,
    ForcePasswordReset,
    PasswordChange,
    TdCreate,
    TdUpdate,
    TdDeactivate,
    VerificationSubmit,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::LoginSuccess => "login_success",
            AuditAction::LoginFailure => "login_failure",
            AuditAction::Logout => "logout",
            AuditAction::MaintenanceToggle => "maintenance_toggle",
            AuditAction::LogoutAllSessions => "logout_all_sessions",
            AuditAction::RestoreDb => "restore_db",
            AuditAction::BackupCreated => "backup_created",
            AuditAction::BackupsPruned => "backups_pruned",
            AuditAction::UserCreated => "user_created",
            AuditAction::UserDeactivated => "user_deactivated",
            AuditAction::UserActivated => "user_activated",
            AuditAction::ForcePasswordReset => "force_password_reset",
            AuditAction::PasswordChange => "password_change",
            AuditAction::TdCreate => "td_create",
            AuditAction::TdUpdate => "td_update",
            AuditAction::TdDeactivate => "td_deactivate",
            AuditAction::VerificationSubmit => "verification_submit",
        }
    }
}

/// Who performed an action. The display name is copied into every record so
/// history survives the actor being renamed or deactivated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Option<i64>,
    pub name: Option<String>,
}

impl Actor {
    pub fn identity(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
        }
    }

    /// Unauthenticated actor known only by the name it claimed.
    pub fn anonymous(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
        }
    }

    pub fn cli() -> Self {
        Self::anonymous("cli")
    }
}

/// Where the request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestOrigin {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent: user_agent.map(|ua| truncate_chars(&ua, USER_AGENT_MAX_LEN)),
        }
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Stored audit record. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor_id: Option<i64>,
    pub actor_name: Option<String>,
    pub action: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Builder for a record about to be appended.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub actor: Actor,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub details: Option<String>,
    pub origin: RequestOrigin,
}

impl AuditEntry {
    pub fn new(action: AuditAction, actor: Actor) -> Self {
        Self {
            action,
            actor,
            resource_type: None,
            resource_id: None,
            details: None,
            origin: RequestOrigin::default(),
        }
    }

    pub fn resource(mut self, kind: impl Into<String>) -> Self {
        self.resource_type = Some(kind.into());
        self
    }

    pub fn resource_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn origin(mut self, origin: &RequestOrigin) -> Self {
        self.origin = origin.clone();
        self
    }

    pub fn into_record(self) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            actor_id: self.actor.id,
            actor_name: self.actor.name,
            action: self.action.as_str().to_string(),
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            details: self.details,
            ip_address: self.origin.ip_address,
            user_agent: self
                .origin
                .user_agent
                .map(|ua| truncate_chars(&ua, USER_AGENT_MAX_LEN)),
            created_at: Utc::now(),
        }
    }
}
