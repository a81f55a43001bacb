use std::sync::Arc;

use crate::models::{Actor, AuditAction, AuditEntry, Identity, RequestOrigin};
use crate::services::audit::AuditLog;
use crate::services::directory::IdentityDirectory;
use crate::services::rate_limit::{LoginRateLimiter, RateLimitStatus};
use crate::services::session::{SessionState, SessionTracker};
use crate::utils::{verify_password, Password};
use service_core::error::AppError;

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub identity: Identity,
    pub session: SessionState,
    pub must_change_password: bool,
}

/// Credential check wrapped in throttling, session start and auditing.
#[derive(Clone)]
pub struct LoginService {
    limiter: LoginRateLimiter,
    sessions: Arc<SessionTracker>,
    directory: Arc<dyn IdentityDirectory>,
    audit: AuditLog,
}

impl LoginService {
    pub fn new(
        limiter: LoginRateLimiter,
        sessions: Arc<SessionTracker>,
        directory: Arc<dyn IdentityDirectory>,
        audit: AuditLog,
    ) -> Self {
        Self {
            limiter,
            sessions,
            directory,
            audit,
        }
    }

    pub async fn login(
        &self,
        username: &str,
        password: Password,
        origin: &RequestOrigin,
    ) -> Result<LoginSuccess, AppError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Username is required")));
        }

        let client = origin.ip_address.as_deref().unwrap_or("unknown");
        if let RateLimitStatus::Blocked { retry_after_secs } =
            self.limiter.check_login(client, username).await
        {
            return Err(AppError::TooManyRequests(
                format!(
                    "Too many failed attempts. Try again in {} seconds.",
                    retry_after_secs
                ),
                Some(retry_after_secs),
            ));
        }

        let record = self.directory.find_by_username(username).await?;
        let verified = record
            .as_ref()
            .map_or(false, |r| verify_password(&password, &r.password_hash));

        let identity = match record {
            Some(r) if verified => r.identity,
            _ => {
                self.limiter.record_failure(client).await;
                self.limiter.record_failure(username).await;
                self.audit
                    .record(
                        AuditEntry::new(AuditAction::LoginFailure, Actor::anonymous(username))
                            .details("invalid_credentials")
                            .origin(origin),
                    )
                    .await;
                tracing::info!(username = %username, client = %client, "Login failed");
                return Err(AppError::Unauthorized(anyhow::anyhow!(
                    "Invalid username or password"
                )));
            }
        };

        if !identity.is_active {
            self.audit
                .record(
                    AuditEntry::new(AuditAction::LoginFailure, Actor::anonymous(username))
                        .details("account_inactive")
                        .origin(origin),
                )
                .await;
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "This account is deactivated"
            )));
        }

        self.limiter.clear(client).await;
        self.limiter.clear(username).await;

        let session = self.sessions.start(identity.id).await;
        self.audit
            .record(
                AuditEntry::new(
                    AuditAction::LoginSuccess,
                    Actor::identity(identity.id, identity.display_name()),
                )
                .resource("auth")
                .origin(origin),
            )
            .await;

        tracing::info!(identity_id = identity.id, role = identity.role.as_str(), "Login succeeded");
        Ok(LoginSuccess {
            must_change_password: identity.must_change_password,
            identity,
            session,
        })
    }

    pub async fn logout(&self, session: &SessionState, actor: Actor, origin: &RequestOrigin) {
        self.sessions.end(session).await;
        self.audit
            .record(
                AuditEntry::new(AuditAction::Logout, actor)
                    .resource("auth")
                    .origin(origin),
            )
            .await;
    }
}
