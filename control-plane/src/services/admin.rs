//! Developer-only control actions. Each state-changing call writes exactly
//! one audit record, and only after its effect has landed.

use std::sync::Arc;
use validator::Validate;

use crate::dtos::{
    BackupCreatedResponse, BackupListResponse, DashboardResponse, LogoutAllResponse,
    MaintenanceResponse, PruneResponse, RestoreRequest, RestoreResponse, SessionsResponse,
};
use crate::models::{Actor, AuditAction, AuditEntry, AuditRecord, RequestOrigin};
use crate::services::audit::{AuditError, AuditLog};
use crate::services::backup::{
    BackupError, BackupOrchestrator, BackupOutcome, RestoreError, RestoreOutcome, RestoreState,
};
use crate::services::maintenance::{MaintenanceGate, MaintenanceStatus};
use crate::services::session::{ActiveSessionCount, FlushOutcome, SessionTracker};
use crate::services::store::SharedStore;
use service_core::error::AppError;

const DASHBOARD_BACKUPS: usize = 10;

#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn SharedStore>,
    maintenance: MaintenanceGate,
    sessions: Arc<SessionTracker>,
    backups: Arc<BackupOrchestrator>,
    audit: AuditLog,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn SharedStore>,
        maintenance: MaintenanceGate,
        sessions: Arc<SessionTracker>,
        backups: Arc<BackupOrchestrator>,
        audit: AuditLog,
    ) -> Self {
        Self {
            store,
            maintenance,
            sessions,
            backups,
            audit,
        }
    }

    pub async fn dashboard(&self) -> Result<DashboardResponse, AppError> {
        let store_healthy = self.store.ping().await.is_ok();
        let mut recent_backups = self.backups.list().await?;
        recent_backups.truncate(DASHBOARD_BACKUPS);

        Ok(DashboardResponse {
            store_healthy,
            maintenance: self.maintenance.status().await.into(),
            sessions: self.sessions().await,
            backups_supported: self.backups.is_supported(),
            recent_backups,
        })
    }

    pub async fn maintenance_status(&self) -> MaintenanceResponse {
        self.maintenance.status().await.into()
    }

    pub async fn set_maintenance(
        &self,
        enabled: bool,
        actor: Actor,
        origin: &RequestOrigin,
    ) -> Result<MaintenanceResponse, AppError> {
        self.maintenance.set_enabled(enabled).await.map_err(|e| {
            AppError::ServiceUnavailable(format!("Maintenance flag unchanged: {}", e))
        })?;

        self.audit
            .record(
                AuditEntry::new(AuditAction::MaintenanceToggle, actor)
                    .details(format!("enabled={}", enabled))
                    .origin(origin),
            )
            .await;

        Ok(if enabled {
            MaintenanceStatus::Enabled
        } else {
            MaintenanceStatus::Disabled
        }
        .into())
    }

    pub async fn sessions(&self) -> SessionsResponse {
        let active_sessions = match self.sessions.active_count().await {
            ActiveSessionCount::Approximate(n) => Some(n),
            ActiveSessionCount::Unavailable => None,
        };
        SessionsResponse {
            active_sessions,
            approximate: true,
        }
    }

    pub async fn logout_all(
        &self,
        actor: Actor,
        origin: &RequestOrigin,
    ) -> Result<LogoutAllResponse, AppError> {
        match self.sessions.flush_all().await {
            FlushOutcome::Flushed { sessions } => {
                self.audit
                    .record(
                        AuditEntry::new(AuditAction::LogoutAllSessions, actor)
                            .details(format!("sessions={}", sessions))
                            .origin(origin),
                    )
                    .await;
                Ok(LogoutAllResponse {
                    sessions_flushed: sessions,
                })
            }
            FlushOutcome::StoreUnavailable => Err(AppError::ServiceUnavailable(
                "Session store unavailable; no sessions were flushed".to_string(),
            )),
        }
    }

    pub async fn list_backups(&self) -> Result<BackupListResponse, AppError> {
        Ok(BackupListResponse {
            supported: self.backups.is_supported(),
            backups: self.backups.list().await?,
        })
    }

    /// Creates a backup, then applies retention.
    pub async fn create_backup(
        &self,
        actor: Actor,
        origin: &RequestOrigin,
    ) -> Result<BackupCreatedResponse, AppError> {
        let backup = match self.backups.create().await {
            BackupOutcome::Created(artifact) => artifact,
            BackupOutcome::Unsupported => return Err(unsupported()),
            BackupOutcome::Failed(BackupError::Tool(e)) => {
                return Err(AppError::BadGateway(e.diagnostic()))
            }
            BackupOutcome::Failed(BackupError::Storage(e)) => return Err(e.into()),
        };

        let pruned = match self.backups.prune().await {
            Ok(report) => report.removed,
            Err(e) => {
                tracing::warn!(error = %e, "Retention pruning after backup failed");
                Vec::new()
            }
        };

        self.audit
            .record(
                AuditEntry::new(AuditAction::BackupCreated, actor)
                    .resource("backup")
                    .resource_id(&backup.file_name)
                    .details(format!("pruned={}", pruned.len()))
                    .origin(origin),
            )
            .await;

        Ok(BackupCreatedResponse { backup, pruned })
    }

    pub async fn prune_backups(
        &self,
        actor: Actor,
        origin: &RequestOrigin,
    ) -> Result<PruneResponse, AppError> {
        let report = self.backups.prune().await?;

        if !report.removed.is_empty() {
            self.audit
                .record(
                    AuditEntry::new(AuditAction::BackupsPruned, actor)
                        .resource("backup")
                        .details(report.removed.join(","))
                        .origin(origin),
                )
                .await;
        }

        Ok(PruneResponse {
            removed: report.removed,
            failed: report.failed,
        })
    }

    pub async fn restore(
        &self,
        request: RestoreRequest,
        actor: Actor,
        origin: &RequestOrigin,
    ) -> Result<RestoreResponse, AppError> {
        request.validate()?;
        if !request.confirmed() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Type RESTORE in both confirmation fields to proceed"
            )));
        }

        let report = self.backups.restore(&request.backup).await;
        let state = report.final_state();
        let transitions = report.transitions;

        match report.outcome {
            RestoreOutcome::Restored { artifact } => {
                self.audit
                    .record(
                        AuditEntry::new(AuditAction::RestoreDb, actor)
                            .resource("backup")
                            .resource_id(&artifact.file_name)
                            .details(format!("restored {}", artifact.file_name))
                            .origin(origin),
                    )
                    .await;
                Ok(RestoreResponse {
                    backup: artifact.file_name,
                    state,
                    transitions,
                    maintenance_enabled: true,
                    message: "Database restored. All users have been logged out. Maintenance mode is still on; disable it when ready.".to_string(),
                })
            }
            RestoreOutcome::Unsupported => Err(unsupported()),
            RestoreOutcome::Rejected(e) => Err(AppError::BadRequest(anyhow::anyhow!(e))),
            RestoreOutcome::Failed {
                at,
                error,
                maintenance_cleared,
            } => {
                if at != RestoreState::Idle {
                    self.audit
                        .record(
                            AuditEntry::new(AuditAction::RestoreDb, actor)
                                .resource("backup")
                                .resource_id(&request.backup)
                                .details(format!("failed at {:?}: {}", at, error))
                                .origin(origin),
                        )
                        .await;
                }

                let suffix = if maintenance_cleared {
                    "Maintenance mode has been disabled."
                } else {
                    "Maintenance mode could not be disabled; check the shared store."
                };
                let message = format!("Restore failed: {}. {}", error, suffix);
                Err(match error {
                    RestoreError::Tool(_) => AppError::BadGateway(message),
                    RestoreError::Maintenance(_) | RestoreError::SessionFlush => {
                        AppError::ServiceUnavailable(message)
                    }
                })
            }
        }
    }

    /// Newest first.
    pub async fn recent_audit(&self, limit: i64, offset: i64) -> Result<Vec<AuditRecord>, AppError> {
        self.audit.recent(limit, offset).await.map_err(|e| match e {
            AuditError::Database(e) => AppError::from(e),
            AuditError::Unavailable(msg) => AppError::ServiceUnavailable(msg),
        })
    }
}

fn unsupported() -> AppError {
    AppError::Conflict(anyhow::anyhow!(
        "Backup and restore are only available for PostgreSQL databases"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::services::audit::MemoryAuditSink;
    use crate::services::backup::{BackupDirectory, DatabaseTarget, MockBackupTool};
    use crate::services::store::MockStore;

    struct Fixture {
        store: Arc<MockStore>,
        sink: Arc<MemoryAuditSink>,
        tool: Arc<MockBackupTool>,
        admin: AdminService,
        _dir: tempfile::TempDir,
    }

    fn fixture(url: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MockStore::new());
        let sink = Arc::new(MemoryAuditSink::new());
        let tool = Arc::new(MockBackupTool::new());
        let gate = MaintenanceGate::new(store.clone(), "td_");
        let sessions = Arc::new(SessionTracker::new(
            store.clone(),
            "td_",
            &SessionConfig {
                lifetime_minutes: 30,
                active_set_ttl_seconds: 86_400,
                cookie_secure: false,
            },
        ));
        let backups = Arc::new(BackupOrchestrator::new(
            DatabaseTarget::from_url(url),
            BackupDirectory::new(dir.path()),
            30,
            tool.clone(),
            gate.clone(),
            sessions.clone(),
        ));
        let admin = AdminService::new(
            store.clone(),
            gate,
            sessions,
            backups,
            AuditLog::new(sink.clone()),
        );
        Fixture {
            store,
            sink,
            tool,
            admin,
            _dir: dir,
        }
    }

    fn dev() -> Actor {
        Actor::identity(1, "dev")
    }

    fn restore_request(backup: &str) -> RestoreRequest {
        RestoreRequest {
            backup: backup.to_string(),
            confirm: "RESTORE".to_string(),
            confirm2: "RESTORE".to_string(),
        }
    }

    #[tokio::test]
    async fn maintenance_toggle_audits_once_per_change() {
        let f = fixture("sqlite://x.db");
        let origin = RequestOrigin::default();
        assert!(f.admin.set_maintenance(true, dev(), &origin).await.unwrap().enabled);
        assert!(!f.admin.set_maintenance(false, dev(), &origin).await.unwrap().enabled);
        assert_eq!(f.sink.actions(), ["maintenance_toggle", "maintenance_toggle"]);

        f.store.set_available(false);
        assert!(matches!(
            f.admin.set_maintenance(true, dev(), &origin).await,
            Err(AppError::ServiceUnavailable(_))
        ));
        assert_eq!(f.sink.records().len(), 2);
    }

    #[tokio::test]
    async fn audit_failure_does_not_undo_effect() {
        let f = fixture("sqlite://x.db");
        f.sink.set_failing(true);
        let resp = f
            .admin
            .set_maintenance(true, dev(), &RequestOrigin::default())
            .await
            .unwrap();
        assert!(resp.enabled);
        assert_eq!(f.admin.maintenance_status().await.status, "enabled");
    }

    #[tokio::test]
    async fn unconfirmed_restore_never_reaches_orchestrator() {
        let f = fixture("postgresql://u:p@localhost/td");
        let mut request = restore_request("td_backup_20260101_000000.sql");
        request.confirm2 = "restore".to_string();
        assert!(f
            .admin
            .restore(request, dev(), &RequestOrigin::default())
            .await
            .is_err());

        let mut request = restore_request("td_backup_20260101_000000.sql");
        request.confirm = "yes".to_string();
        request.confirm2 = "yes".to_string();
        assert!(matches!(
            f.admin
                .restore(request, dev(), &RequestOrigin::default())
                .await,
            Err(AppError::BadRequest(_))
        ));

        assert!(f.tool.calls().is_empty());
        assert!(f.sink.records().is_empty());
    }

    #[tokio::test]
    async fn backup_then_restore_audits_each_once() {
        let f = fixture("postgresql://u:p@localhost/td");
        let origin = RequestOrigin::default();
        let created = f.admin.create_backup(dev(), &origin).await.unwrap();

        let restored = f
            .admin
            .restore(restore_request(&created.backup.file_name), dev(), &origin)
            .await
            .unwrap();
        assert_eq!(restored.state, RestoreState::Done);
        assert!(restored.maintenance_enabled);
        assert_eq!(f.sink.actions(), ["backup_created", "restore_db"]);

        let recent = f.admin.recent_audit(10, 0).await.unwrap();
        assert_eq!(recent[0].action, "restore_db");
        assert_eq!(recent[0].resource_id.as_deref(), Some(created.backup.file_name.as_str()));
    }

    #[tokio::test]
    async fn failed_restore_is_audited_and_reports_diagnostic() {
        let f = fixture("postgresql://u:p@localhost/td");
        let origin = RequestOrigin::default();
        let created = f.admin.create_backup(dev(), &origin).await.unwrap();
        f.tool.fail_restore(true);

        match f
            .admin
            .restore(restore_request(&created.backup.file_name), dev(), &origin)
            .await
        {
            Err(AppError::BadGateway(msg)) => {
                assert!(msg.contains("syntax error"));
                assert!(msg.contains("Maintenance mode has been disabled"));
            }
            other => panic!("expected tool failure, got {:?}", other.map(|r| r.state)),
        }
        assert_eq!(f.sink.actions(), ["backup_created", "restore_db"]);
        assert_eq!(f.admin.maintenance_status().await.status, "disabled");
    }

    #[tokio::test]
    async fn unsupported_database_writes_no_audit() {
        let f = fixture("sqlite://td_checklist.db");
        let origin = RequestOrigin::default();
        assert!(matches!(
            f.admin.create_backup(dev(), &origin).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            f.admin
                .restore(restore_request("td_backup_20260101_000000.sql"), dev(), &origin)
                .await,
            Err(AppError::Conflict(_))
        ));
        assert!(f.sink.records().is_empty());
    }

    #[tokio::test]
    async fn logout_all_reports_flushed_sessions() {
        let f = fixture("sqlite://x.db");
        let resp = f
            .admin
            .logout_all(dev(), &RequestOrigin::default())
            .await
            .unwrap();
        assert_eq!(resp.sessions_flushed, 0);
        assert_eq!(f.sink.actions(), ["logout_all_sessions"]);
        assert_eq!(f.admin.sessions().await.active_sessions, Some(0));
    }
}
