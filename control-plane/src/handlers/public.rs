use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::services::metrics::get_metrics;
use crate::services::MaintenanceStatus;
use crate::AppState;

/// Liveness plus a view of the shared store. The service stays up while
/// the store is down, so this never fails on store health alone.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store = if state.store.ping().await.is_ok() {
        "up"
    } else {
        "down"
    };

    Json(json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "shared_store": store,
    }))
}

/// Notice page that maintenance mode redirects to.
pub async fn maintenance_page(State(state): State<AppState>) -> Response {
    match state.maintenance.status().await {
        MaintenanceStatus::Enabled => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "60")],
            Json(json!({
                "maintenance": true,
                "message": "The system is under maintenance. Please try again shortly.",
            })),
        )
            .into_response(),
        _ => Json(json!({
            "maintenance": false,
            "message": "The system is available.",
        }))
        .into_response(),
    }
}

pub async fn metrics() -> Response {
    match get_metrics() {
        Some(body) => body.into_response(),
        None => (
            StatusCode::NOT_FOUND,
            "# Metrics recorder not initialized\n",
        )
            .into_response(),
    }
}
