use serde::Serialize;
use thiserror::Error;

use super::artifacts::ArtifactError;
use super::executor::ToolError;
use crate::models::BackupArtifact;
use crate::services::store::StoreError;

/// Restore progresses strictly in this order. Every non-terminal state has a
/// rollback edge to `FailedRolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    Idle,
    MaintenanceOn,
    SessionsFlushed,
    Restoring,
    Done,
    FailedRolledBack,
}

impl RestoreState {
    pub fn next(self) -> RestoreState {
        match self {
            RestoreState::Idle => RestoreState::MaintenanceOn,
            RestoreState::MaintenanceOn => RestoreState::SessionsFlushed,
            RestoreState::SessionsFlushed => RestoreState::Restoring,
            RestoreState::Restoring => RestoreState::Done,
            terminal => terminal,
        }
    }

    pub fn rollback(self) -> RestoreState {
        if self.is_terminal() {
            self
        } else {
            RestoreState::FailedRolledBack
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RestoreState::Done | RestoreState::FailedRolledBack)
    }
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("could not enable maintenance mode: {0}")]
    Maintenance(StoreError),

    #[error("could not flush sessions: shared store unavailable")]
    SessionFlush,

    #[error(transparent)]
    Tool(#[from] ToolError),
}

#[derive(Debug)]
pub enum RestoreOutcome {
    /// Maintenance stays on; re-opening is a separate developer action.
    Restored { artifact: BackupArtifact },
    /// Non-durable database; nothing was touched.
    Unsupported,
    /// Artifact failed the name/location guard; nothing was touched.
    Rejected(ArtifactError),
    Failed {
        at: RestoreState,
        error: RestoreError,
        /// False when maintenance could not be switched back off.
        maintenance_cleared: bool,
    },
}

impl RestoreOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RestoreOutcome::Restored { .. } => "restored",
            RestoreOutcome::Unsupported => "unsupported",
            RestoreOutcome::Rejected(_) => "rejected",
            RestoreOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug)]
pub struct RestoreReport {
    pub outcome: RestoreOutcome,
    /// Every state entered, starting with `Idle`.
    pub transitions: Vec<RestoreState>,
}

impl RestoreReport {
    pub fn final_state(&self) -> RestoreState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(RestoreState::Idle)
    }
}
