use axum::{extract::State, Json};
use axum_extra::extract::cookie::CookieJar;
use validator::Validate;

use crate::dtos::{LoginRequest, LoginResponse, MessageResponse};
use crate::middleware::{removal_cookie, session_cookie, SESSION_COOKIE};
use crate::models::{Actor, RequestOrigin};
use crate::services::SessionLookup;
use crate::utils::Password;
use crate::AppState;
use service_core::error::AppError;

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    origin: RequestOrigin,
    Json(payload): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    payload.validate()?;

    let success = state
        .login
        .login(&payload.username, Password::new(payload.password), &origin)
        .await?;

    let cookie = session_cookie(
        success.session.session_id.clone(),
        state.config.session.cookie_secure,
    );

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            identity_id: success.identity.id,
            username: success.identity.username,
            role: success.identity.role,
            must_change_password: success.must_change_password,
        }),
    ))
}

/// Ends the caller's session if there is one. Always clears the cookie, so
/// a stale or unknown session still logs out cleanly.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
    origin: RequestOrigin,
) -> (CookieJar, Json<MessageResponse>) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let session = match state.sessions.lookup(cookie.value()).await {
            SessionLookup::Active(session) | SessionLookup::Expired(session) => Some(session),
            SessionLookup::Revoked => None,
        };

        if let Some(session) = session {
            let actor = match state.directory.find_by_id(session.identity_id).await {
                Ok(Some(identity)) => Actor::identity(identity.id, identity.display_name()),
                Ok(None) => Actor {
                    id: Some(session.identity_id),
                    name: None,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Could not resolve identity for logout");
                    Actor {
                        id: Some(session.identity_id),
                        name: None,
                    }
                }
            };
            state.login.logout(&session, actor, &origin).await;
        }
    }

    (
        jar.remove(removal_cookie()),
        Json(MessageResponse::new("Logged out")),
    )
}
