//! Database backup creation, retention and restore.
//!
//! Restore is not protected by any lock. Two restores started at the same
//! time interleave their maintenance and flush steps and the resulting
//! database contents are whichever dump finished last; operators must not
//! start a restore while another one is running.

pub mod artifacts;
pub mod executor;
pub mod restore;
pub mod target;
pub mod tool;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::models::BackupArtifact;
use crate::services::maintenance::MaintenanceGate;
use crate::services::session::{FlushOutcome, SessionTracker};

pub use artifacts::{artifact_name, is_artifact_name, ArtifactError, BackupDirectory, PruneReport};
pub use executor::{CommandExecutor, ToolError};
pub use restore::{RestoreError, RestoreOutcome, RestoreReport, RestoreState};
pub use target::{DatabaseTarget, PgConnection};
pub use tool::{BackupTool, MockBackupTool, PgTools, ToolCall};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("backup storage error: {0}")]
    Storage(#[from] std::io::Error),
}

#[derive(Debug)]
pub enum BackupOutcome {
    Created(BackupArtifact),
    /// Non-durable database configuration; not an error.
    Unsupported,
    Failed(BackupError),
}

impl BackupOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BackupOutcome::Created(_) => "created",
            BackupOutcome::Unsupported => "unsupported",
            BackupOutcome::Failed(_) => "failed",
        }
    }
}

pub struct BackupOrchestrator {
    target: DatabaseTarget,
    directory: BackupDirectory,
    retention_days: u64,
    tool: Arc<dyn BackupTool>,
    maintenance: MaintenanceGate,
    sessions: Arc<SessionTracker>,
}

impl BackupOrchestrator {
    pub fn new(
        target: DatabaseTarget,
        directory: BackupDirectory,
        retention_days: u64,
        tool: Arc<dyn BackupTool>,
        maintenance: MaintenanceGate,
        sessions: Arc<SessionTracker>,
    ) -> Self {
        Self {
            target,
            directory,
            retention_days,
            tool,
            maintenance,
            sessions,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.target.is_durable()
    }

    pub fn directory(&self) -> &BackupDirectory {
        &self.directory
    }

    pub async fn list(&self) -> std::io::Result<Vec<BackupArtifact>> {
        self.directory.list().await
    }

    pub async fn prune(&self) -> std::io::Result<PruneReport> {
        self.directory.prune(self.retention_days).await
    }

    pub async fn create(&self) -> BackupOutcome {
        self.create_at(Utc::now()).await
    }

    /// `idle -> dumping -> {artifact_written | failed}`.
    pub async fn create_at(&self, now: DateTime<Utc>) -> BackupOutcome {
        let outcome = self.run_dump(now).await;
        metrics::counter!("backup_runs_total", "outcome" => outcome.label()).increment(1);
        outcome
    }

    async fn run_dump(&self, now: DateTime<Utc>) -> BackupOutcome {
        let DatabaseTarget::Postgres(conn) = &self.target else {
            tracing::info!("Backup skipped: database is not PostgreSQL");
            return BackupOutcome::Unsupported;
        };

        if let Err(e) = self.directory.ensure().await {
            tracing::error!(dir = ?self.directory.root(), error = %e, "Backup directory unusable");
            return BackupOutcome::Failed(BackupError::Storage(e));
        }

        let name = artifact_name(now);
        let path = self.directory.path_for(&name);
        tracing::info!(file = %name, "Starting database dump");

        if let Err(e) = self.tool.dump(conn, &path).await {
            // Do not leave a tool-owned partial file that would list as a backup.
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(file = %name, error = %rm, "Could not remove partial dump");
                }
            }
            tracing::error!(file = %name, error = %e, "Database dump failed");
            return BackupOutcome::Failed(BackupError::Tool(e));
        }

        match BackupDirectory::describe(path).await {
            Ok(Some(artifact)) => {
                tracing::info!(file = %artifact.file_name, size_bytes = artifact.size_bytes, "Backup created");
                BackupOutcome::Created(artifact)
            }
            Ok(None) => BackupOutcome::Failed(BackupError::Storage(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "dump tool exited cleanly but wrote no file",
            ))),
            Err(e) => BackupOutcome::Failed(BackupError::Storage(e)),
        }
    }

    /// `idle -> maintenance_on -> sessions_flushed -> restoring -> {done | failed_rolled_back}`.
    ///
    /// Confirmation of intent is the caller's job and must happen before
    /// this is called.
    pub async fn restore(&self, requested: &str) -> RestoreReport {
        let report = self.run_restore(requested).await;
        metrics::counter!("restore_runs_total", "outcome" => report.outcome.label()).increment(1);
        report
    }

    async fn run_restore(&self, requested: &str) -> RestoreReport {
        let mut state = RestoreState::Idle;
        let mut transitions = vec![state];

        let DatabaseTarget::Postgres(conn) = &self.target else {
            tracing::info!("Restore refused: database is not PostgreSQL");
            return RestoreReport {
                outcome: RestoreOutcome::Unsupported,
                transitions,
            };
        };

        let artifact = match self.directory.resolve(requested).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(requested = %requested, error = %e, "Restore rejected");
                return RestoreReport {
                    outcome: RestoreOutcome::Rejected(e),
                    transitions,
                };
            }
        };

        tracing::warn!(file = %artifact.file_name, "Starting database restore");

        if let Err(e) = self.maintenance.set_enabled(true).await {
            return self
                .roll_back(state, RestoreError::Maintenance(e), transitions)
                .await;
        }
        state = state.next();
        transitions.push(state);

        if let FlushOutcome::StoreUnavailable = self.sessions.flush_all().await {
            return self
                .roll_back(state, RestoreError::SessionFlush, transitions)
                .await;
        }
        state = state.next();
        transitions.push(state);

        state = state.next();
        transitions.push(state);
        if let Err(e) = self.tool.restore(conn, &artifact.path).await {
            return self
                .roll_back(state, RestoreError::Tool(e), transitions)
                .await;
        }
        state = state.next();
        transitions.push(state);

        tracing::warn!(
            file = %artifact.file_name,
            "Database restored; maintenance mode remains enabled"
        );
        RestoreReport {
            outcome: RestoreOutcome::Restored { artifact },
            transitions,
        }
    }

    async fn roll_back(
        &self,
        at: RestoreState,
        error: RestoreError,
        mut transitions: Vec<RestoreState>,
    ) -> RestoreReport {
        tracing::error!(state = ?at, error = %error, "Restore failed, disabling maintenance");

        let maintenance_cleared = match self.maintenance.set_enabled(false).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Could not disable maintenance after failed restore");
                false
            }
        };
        transitions.push(at.rollback());

        RestoreReport {
            outcome: RestoreOutcome::Failed {
                at,
                error,
                maintenance_cleared,
            },
            transitions,
        }
    }
}
