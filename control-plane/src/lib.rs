pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::config::ControlPlaneConfig;
use crate::services::backup::{BackupDirectory, BackupTool, DatabaseTarget, PgTools};
use crate::services::{
    AdminService, AuditLog, AuditSink, BackupOrchestrator, IdentityDirectory, LoginRateLimiter,
    LoginService, MaintenanceGate, MemoryAuditSink, PgAuditSink, PgIdentityDirectory, RedisStore,
    SessionTracker, SharedStore, StaticDirectory,
};

#[derive(Clone)]
pub struct AppState {
    pub config: ControlPlaneConfig,
    pub store: Arc<dyn SharedStore>,
    pub maintenance: MaintenanceGate,
    pub sessions: Arc<SessionTracker>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub login: LoginService,
    pub admin: AdminService,
}

/// Collaborators that differ between production and tests.
pub struct Backends {
    pub store: Arc<dyn SharedStore>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub backup_tool: Arc<dyn BackupTool>,
}

impl AppState {
    pub fn new(config: ControlPlaneConfig, backends: Backends) -> Self {
        let prefix = config.redis.key_prefix.as_str();
        let store = backends.store;
        let audit = AuditLog::new(backends.audit_sink);

        let maintenance = MaintenanceGate::new(store.clone(), prefix);
        let sessions = Arc::new(SessionTracker::new(store.clone(), prefix, &config.session));
        let limiter = LoginRateLimiter::new(store.clone(), prefix, &config.rate_limit);

        let backups = Arc::new(BackupOrchestrator::new(
            DatabaseTarget::from_url(&config.database.url),
            BackupDirectory::new(config.backup.dir.clone()),
            config.backup.retention_days,
            backends.backup_tool,
            maintenance.clone(),
            sessions.clone(),
        ));

        let login = LoginService::new(
            limiter,
            sessions.clone(),
            backends.directory.clone(),
            audit.clone(),
        );
        let admin = AdminService::new(
            store.clone(),
            maintenance.clone(),
            sessions.clone(),
            backups,
            audit,
        );

        Self {
            config,
            store,
            maintenance,
            sessions,
            directory: backends.directory,
            login,
            admin,
        }
    }
}

/// Connects the production backends. PostgreSQL supplies accounts and the
/// audit trail; any other database runs with an empty directory and an
/// in-memory audit trail, and backup/restore report themselves unsupported.
pub async fn connect(config: ControlPlaneConfig) -> Result<AppState, AppError> {
    let store: Arc<dyn SharedStore> = Arc::new(RedisStore::new(&config.redis).map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("invalid REDIS_URL: {}", e))
    })?);
    tracing::info!("Shared store client initialized");

    let (directory, audit_sink): (Arc<dyn IdentityDirectory>, Arc<dyn AuditSink>) =
        if config.database.is_postgres() {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("Database initialized successfully");
            (
                Arc::new(PgIdentityDirectory::new(pool.clone())),
                Arc::new(PgAuditSink::new(pool)),
            )
        } else {
            tracing::warn!(
                "DATABASE_URL is not PostgreSQL; running without accounts or a durable audit trail"
            );
            (
                Arc::new(StaticDirectory::new()),
                Arc::new(MemoryAuditSink::new()),
            )
        };

    let backup_tool = Arc::new(PgTools::new(&config.backup));

    Ok(AppState::new(
        config,
        Backends {
            store,
            directory,
            audit_sink,
            backup_tool,
        },
    ))
}

pub fn build_router(state: AppState) -> Router {
    build_router_with(state, Router::new())
}

/// Mounts `protected` (the rest of the application) behind the maintenance
/// gate and the session layer: every request there needs a live session,
/// which is touched or expired before the handler runs.
pub fn build_router_with(state: AppState, protected: Router<AppState>) -> Router {
    let protected = protected.layer(from_fn_with_state(
        state.clone(),
        middleware::session_middleware,
    ));

    let developer_routes = Router::new()
        .route("/developer/dashboard", get(handlers::developer::dashboard))
        .route(
            "/developer/maintenance",
            get(handlers::developer::get_maintenance).post(handlers::developer::set_maintenance),
        )
        .route("/developer/sessions", get(handlers::developer::sessions))
        .route("/developer/logout-all", post(handlers::developer::logout_all))
        .route(
            "/developer/backups",
            get(handlers::developer::list_backups).post(handlers::developer::create_backup),
        )
        .route(
            "/developer/backups/prune",
            post(handlers::developer::prune_backups),
        )
        .route(
            "/developer/backups/restore",
            post(handlers::developer::restore_backup),
        )
        .route("/developer/audit", get(handlers::developer::audit_log))
        .layer(from_fn(middleware::require_developer))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::public::health_check))
        .route("/metrics", get(handlers::public::metrics))
        .route(
            middleware::MAINTENANCE_PAGE,
            get(handlers::public::maintenance_page),
        )
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .nest_service("/static", ServeDir::new(&state.config.static_dir))
        .merge(developer_routes)
        .merge(protected)
        .with_state(state.clone())
        // Maintenance gate runs before any handler
        .layer(from_fn_with_state(
            state,
            middleware::maintenance_middleware,
        ))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
}
