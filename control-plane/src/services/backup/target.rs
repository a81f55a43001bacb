use secrecy::Secret;
use url::Url;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_USER: &str = "postgres";
const DEFAULT_DATABASE: &str = "td_checklist";

/// Connection parameters handed to the dump/restore tools.
#[derive(Debug)]
pub struct PgConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<Secret<String>>,
    pub database: String,
}

/// What the configured database URL points at.
#[derive(Debug)]
pub enum DatabaseTarget {
    Postgres(PgConnection),
    /// Local-file or otherwise unsupported database; no dump tool applies.
    NonDurable,
}

impl DatabaseTarget {
    pub fn from_url(raw: &str) -> Self {
        let raw = raw.trim();
        if !(raw.starts_with("postgresql://") || raw.starts_with("postgres://")) {
            return DatabaseTarget::NonDurable;
        }

        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Unparsable database URL; backups disabled");
                return DatabaseTarget::NonDurable;
            }
        };

        let decode = |s: &str| {
            urlencoding::decode(s)
                .map(|c| c.into_owned())
                .unwrap_or_else(|_| s.to_string())
        };

        let user = match url.username() {
            "" => DEFAULT_USER.to_string(),
            name => decode(name),
        };
        let password = url.password().map(|p| Secret::new(decode(p)));
        let database = match url.path().trim_start_matches('/') {
            "" => DEFAULT_DATABASE.to_string(),
            name => decode(name),
        };

        DatabaseTarget::Postgres(PgConnection {
            host: url
                .host_str()
                .filter(|h| !h.is_empty())
                .unwrap_or(DEFAULT_HOST)
                .to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
            user,
            password,
            database,
        })
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, DatabaseTarget::Postgres(_))
    }
}
