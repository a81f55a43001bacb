use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Elevated administrator; the only role allowed on the control surface.
    Developer,
    Admin,
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Developer => "developer",
            Role::Admin => "admin",
            Role::Operator => "operator",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "developer" => Ok(Role::Developer),
            "admin" => Ok(Role::Admin),
            "operator" => Ok(Role::Operator),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Account as read by the control plane. Owned by account management.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: i64,
    pub username: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub must_change_password: bool,
}

impl Identity {
    pub fn display_name(&self) -> &str {
        &self.username
    }
}

/// Row shape of the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct IdentityRow {
    pub id: i64,
    pub username: String,
    pub full_name: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub must_change_password: bool,
    pub password_hash: String,
}

/// Identity together with its stored password hash.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub identity: Identity,
    pub password_hash: String,
}

impl TryFrom<IdentityRow> for CredentialRecord {
    type Error = String;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(Self {
            identity: Identity {
                id: row.id,
                username: row.username,
                full_name: row.full_name,
                role: row.role.parse()?,
                is_active: row.is_active,
                must_change_password: row.must_change_password,
            },
            password_hash: row.password_hash,
        })
    }
}
