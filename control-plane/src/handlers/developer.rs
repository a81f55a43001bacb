//! Developer control surface. Every route here sits behind the session and
//! developer-role middleware and is exempt from maintenance mode.

use axum::{
    extract::{Query, State},
    Json,
};

use crate::dtos::{
    AuditQuery, BackupCreatedResponse, BackupListResponse, DashboardResponse, LogoutAllResponse,
    MaintenanceRequest, MaintenanceResponse, PruneResponse, RestoreRequest, RestoreResponse,
    SessionsResponse,
};
use crate::middleware::CurrentIdentity;
use crate::models::{AuditRecord, RequestOrigin};
use crate::AppState;
use service_core::error::AppError;

pub async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardResponse>, AppError> {
    Ok(Json(state.admin.dashboard().await?))
}

pub async fn get_maintenance(State(state): State<AppState>) -> Json<MaintenanceResponse> {
    Json(state.admin.maintenance_status().await)
}

pub async fn set_maintenance(
    State(state): State<AppState>,
    current: CurrentIdentity,
    origin: RequestOrigin,
    Json(payload): Json<MaintenanceRequest>,
) -> Result<Json<MaintenanceResponse>, AppError> {
    let response = state
        .admin
        .set_maintenance(payload.enabled, current.actor(), &origin)
        .await?;
    Ok(Json(response))
}

pub async fn sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(state.admin.sessions().await)
}

pub async fn logout_all(
    State(state): State<AppState>,
    current: CurrentIdentity,
    origin: RequestOrigin,
) -> Result<Json<LogoutAllResponse>, AppError> {
    Ok(Json(state.admin.logout_all(current.actor(), &origin).await?))
}

pub async fn list_backups(
    State(state): State<AppState>,
) -> Result<Json<BackupListResponse>, AppError> {
    Ok(Json(state.admin.list_backups().await?))
}

pub async fn create_backup(
    State(state): State<AppState>,
    current: CurrentIdentity,
    origin: RequestOrigin,
) -> Result<Json<BackupCreatedResponse>, AppError> {
    Ok(Json(state.admin.create_backup(current.actor(), &origin).await?))
}

pub async fn prune_backups(
    State(state): State<AppState>,
    current: CurrentIdentity,
    origin: RequestOrigin,
) -> Result<Json<PruneResponse>, AppError> {
    Ok(Json(state.admin.prune_backups(current.actor(), &origin).await?))
}

pub async fn restore_backup(
    State(state): State<AppState>,
    current: CurrentIdentity,
    origin: RequestOrigin,
    Json(payload): Json<RestoreRequest>,
) -> Result<Json<RestoreResponse>, AppError> {
    tracing::warn!(
        identity_id = current.0.id,
        backup = %payload.backup,
        "Database restore requested"
    );
    Ok(Json(
        state
            .admin
            .restore(payload, current.actor(), &origin)
            .await?,
    ))
}

pub async fn audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditRecord>>, AppError> {
    let (limit, offset) = query.bounds();
    Ok(Json(state.admin.recent_audit(limit, offset).await?))
}
