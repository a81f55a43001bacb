use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub static_dir: PathBuf,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    pub rate_limit: RateLimitConfig,
    pub session: SessionConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub key_prefix: String,
}

impl RedisConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// True when the configured database can be served by the dump/restore
    /// tooling and the Postgres audit sink.
    pub fn is_postgres(&self) -> bool {
        self.url.starts_with("postgresql://") || self.url.starts_with("postgres://")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub cooldown_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub lifetime_minutes: i64,
    pub active_set_ttl_seconds: u64,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub retention_days: u64,
    pub dump_timeout_seconds: u64,
    pub restore_timeout_seconds: u64,
    pub pg_dump_bin: String,
    pub psql_bin: String,
}

impl ControlPlaneConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = ControlPlaneConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("td-control-plane"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            static_dir: PathBuf::from(get_env("STATIC_DIR", Some("./static"), false)?),
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://localhost:6379/0"), is_prod)?,
                connect_timeout_ms: parse_env("REDIS_CONNECT_TIMEOUT_MS", "2000", is_prod)?,
                operation_timeout_ms: parse_env("REDIS_OPERATION_TIMEOUT_MS", "2000", is_prod)?,
                key_prefix: get_env("REDIS_KEY_PREFIX", Some("td_"), is_prod)?,
            },
            database: DatabaseConfig {
                url: normalize_database_url(get_env(
                    "DATABASE_URL",
                    Some("sqlite://td_checklist.db"),
                    is_prod,
                )?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "5", is_prod)?,
            },
            rate_limit: RateLimitConfig {
                max_attempts: parse_env("RATE_LIMIT_MAX_ATTEMPTS", "5", is_prod)?,
                cooldown_seconds: parse_env("RATE_LIMIT_COOLDOWN_SECONDS", "120", is_prod)?,
            },
            session: SessionConfig {
                lifetime_minutes: parse_env("SESSION_LIFETIME_MINUTES", "30", is_prod)?,
                active_set_ttl_seconds: parse_env(
                    "SESSION_ACTIVE_SET_TTL_SECONDS",
                    "86400",
                    is_prod,
                )?,
                cookie_secure: get_env(
                    "SESSION_COOKIE_SECURE",
                    Some(if is_prod { "true" } else { "false" }),
                    false,
                )?
                .parse()
                .unwrap_or(is_prod),
            },
            backup: BackupConfig {
                dir: PathBuf::from(get_env("BACKUP_DIR", Some("./backups"), is_prod)?),
                retention_days: parse_env("BACKUP_RETENTION_DAYS", "30", is_prod)?,
                dump_timeout_seconds: parse_env("BACKUP_DUMP_TIMEOUT_SECONDS", "300", is_prod)?,
                restore_timeout_seconds: parse_env(
                    "BACKUP_RESTORE_TIMEOUT_SECONDS",
                    "600",
                    is_prod,
                )?,
                pg_dump_bin: get_env("PG_DUMP_BIN", Some("pg_dump"), false)?,
                psql_bin: get_env("PSQL_BIN", Some("psql"), false)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.rate_limit.max_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RATE_LIMIT_MAX_ATTEMPTS must be positive"
            )));
        }

        if self.rate_limit.cooldown_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RATE_LIMIT_COOLDOWN_SECONDS must be positive"
            )));
        }

        if self.session.lifetime_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_LIFETIME_MINUTES must be positive"
            )));
        }

        if self.backup.retention_days == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "BACKUP_RETENTION_DAYS must be positive"
            )));
        }

        if self.backup.dump_timeout_seconds == 0 || self.backup.restore_timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Backup tool timeouts must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if !self.session.cookie_secure {
                tracing::error!("Session cookies are not marked Secure in production");
            }
            if !self.database.is_postgres() {
                tracing::warn!("Production is running without PostgreSQL; backup and restore are unavailable");
            }
        }

        Ok(())
    }
}

/// Heroku-style `postgres://` URLs are rewritten to the canonical scheme.
fn normalize_database_url(url: String) -> String {
    match url.strip_prefix("postgres://") {
        Some(rest) => format!("postgresql://{}", rest),
        None => url,
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
