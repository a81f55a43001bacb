use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::models::{Actor, Identity, Role};
use crate::services::{SessionLookup, SessionState};
use crate::AppState;
use service_core::error::AppError;

pub const SESSION_COOKIE: &str = "td_session";
pub const EXPIRED_REDIRECT: &str = "/auth/login?expired=1";

/// Session cookie carrying the opaque session id.
pub fn session_cookie(session_id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Cookie that clears the session cookie on the client. Path must match the
/// one it was issued with.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

/// Resolves the session cookie to a live identity.
///
/// Active sessions are touched and the identity and session state are
/// stored in request extensions. Expired sessions are ended and redirected
/// to the login page; missing or revoked sessions get a 401.
pub async fn session_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let session_id = match jar.get(SESSION_COOKIE) {
        Some(cookie) => cookie.value().to_string(),
        None => {
            return AppError::Unauthorized(anyhow::anyhow!("Login required")).into_response();
        }
    };

    let mut session = match state.sessions.lookup(&session_id).await {
        SessionLookup::Active(session) => session,
        SessionLookup::Expired(session) => {
            state.sessions.end(&session).await;
            tracing::info!(identity_id = session.identity_id, "Session expired");
            return (jar.remove(removal_cookie()), Redirect::to(EXPIRED_REDIRECT)).into_response();
        }
        SessionLookup::Revoked => {
            return (
                jar.remove(removal_cookie()),
                AppError::Unauthorized(anyhow::anyhow!("Session is no longer valid")),
            )
                .into_response();
        }
    };

    let identity = match state.directory.find_by_id(session.identity_id).await {
        Ok(Some(identity)) if identity.is_active => identity,
        Ok(_) => {
            state.sessions.end(&session).await;
            tracing::warn!(
                identity_id = session.identity_id,
                "Session belongs to a missing or deactivated account"
            );
            return (
                jar.remove(removal_cookie()),
                AppError::Unauthorized(anyhow::anyhow!("Account is not active")),
            )
                .into_response();
        }
        Err(e) => return e.into_response(),
    };

    state.sessions.touch(&mut session).await;

    req.extensions_mut().insert(CurrentIdentity(identity));
    req.extensions_mut().insert(session);

    next.run(req).await
}

/// Lets only developers through. Must sit inside `session_middleware`.
pub async fn require_developer(req: Request, next: Next) -> Response {
    match req.extensions().get::<CurrentIdentity>() {
        Some(CurrentIdentity(identity)) if identity.role == Role::Developer => {
            next.run(req).await
        }
        Some(CurrentIdentity(identity)) => {
            tracing::warn!(
                identity_id = identity.id,
                role = identity.role.as_str(),
                path = %req.uri().path(),
                "Developer route refused"
            );
            AppError::Forbidden(anyhow::anyhow!("Developer role required")).into_response()
        }
        None => AppError::Unauthorized(anyhow::anyhow!("Login required")).into_response(),
    }
}

/// Extractor for the identity resolved by `session_middleware`.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

impl CurrentIdentity {
    pub fn actor(&self) -> Actor {
        Actor::identity(self.0.id, self.0.display_name())
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Login required")))
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for SessionState
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionState>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Login required")))
    }
}
