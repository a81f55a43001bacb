use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use crate::services::MaintenanceGate;
use crate::AppState;

pub const MAINTENANCE_PAGE: &str = "/maintenance";

/// Holds every non-exempt request at the maintenance notice while the flag
/// is set. A store outage reads as "not in maintenance".
pub async fn maintenance_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if MaintenanceGate::is_exempt(path) {
        return next.run(req).await;
    }

    if state.maintenance.is_enabled().await {
        tracing::debug!(path = %path, "Request held by maintenance mode");
        return Redirect::to(MAINTENANCE_PAGE).into_response();
    }

    next.run(req).await
}
