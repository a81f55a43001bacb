use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Mutex;

use crate::models::{CredentialRecord, Identity, IdentityRow};
use crate::utils::{hash_password, Password};
use service_core::error::AppError;

/// Read-only view of the account store.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<CredentialRecord>, AppError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Identity>, AppError>;
}

#[derive(Clone)]
pub struct PgIdentityDirectory {
    pool: PgPool,
}

impl PgIdentityDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_USER: &str = "SELECT id, username, full_name, role, is_active, must_change_password, password_hash FROM users";

fn into_record(row: IdentityRow) -> Result<CredentialRecord, AppError> {
    CredentialRecord::try_from(row).map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
}

#[async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<CredentialRecord>, AppError> {
        sqlx::query_as::<_, IdentityRow>(&format!("{} WHERE username = $1", SELECT_USER))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(into_record)
            .transpose()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Identity>, AppError> {
        Ok(sqlx::query_as::<_, IdentityRow>(&format!("{} WHERE id = $1", SELECT_USER))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(into_record)
            .transpose()?
            .map(|record| record.identity))
    }
}

/// Fixed in-memory directory.
#[derive(Default)]
pub struct StaticDirectory {
    accounts: Mutex<Vec<CredentialRecord>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an account with a freshly hashed password.
    pub fn with_account(self, identity: Identity, password: &str) -> Result<Self, AppError> {
        let password_hash = hash_password(&Password::new(password.to_string()))?;
        self.accounts
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("directory mutex poisoned: {}", e)))?
            .push(CredentialRecord {
                identity,
                password_hash,
            });
        Ok(self)
    }

    /// Flips the active flag, as account management would.
    pub fn set_active(&self, id: i64, active: bool) {
        if let Ok(mut accounts) = self.accounts.lock() {
            for account in accounts.iter_mut().filter(|a| a.identity.id == id) {
                account.identity.is_active = active;
            }
        }
    }

    fn find(&self, pred: impl Fn(&Identity) -> bool) -> Result<Option<CredentialRecord>, AppError> {
        Ok(self
            .accounts
            .lock()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("directory mutex poisoned: {}", e)))?
            .iter()
            .find(|a| pred(&a.identity))
            .cloned())
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<CredentialRecord>, AppError> {
        self.find(|i| i.username == username)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Identity>, AppError> {
        Ok(self.find(|i| i.id == id)?.map(|r| r.identity))
    }
}
