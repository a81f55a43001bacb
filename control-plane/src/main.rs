use clap::{Parser, Subcommand, ValueEnum};
use control_plane::{
    build_router, config::ControlPlaneConfig, connect, models::Actor, models::RequestOrigin,
    services::metrics::init_metrics, AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::process::ExitCode;
use tokio::signal;

/// TD control plane: HTTP service and operator commands
#[derive(Parser, Debug)]
#[command(name = "td-control-plane")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,

    /// Create a database backup, then apply retention
    BackupCreate,

    /// Delete backups older than the retention window
    BackupPrune,

    /// Turn maintenance mode on or off
    Maintenance {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<ExitCode, AppError> {
    let cli = Cli::parse();

    // Load configuration - fail fast if invalid
    let config = ControlPlaneConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await.map(|()| ExitCode::SUCCESS),
        Command::BackupCreate => {
            let state = connect(config).await?;
            match state
                .admin
                .create_backup(Actor::cli(), &RequestOrigin::default())
                .await
            {
                Ok(created) => {
                    tracing::info!(
                        backup = %created.backup.file_name,
                        size_bytes = created.backup.size_bytes,
                        pruned = created.pruned.len(),
                        "Backup created"
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Backup failed");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::BackupPrune => {
            let state = connect(config).await?;
            let report = state
                .admin
                .prune_backups(Actor::cli(), &RequestOrigin::default())
                .await?;
            tracing::info!(
                removed = report.removed.len(),
                failed = report.failed.len(),
                "Backup retention applied"
            );
            Ok(if report.failed.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Maintenance { state: toggle } => {
            let state = connect(config).await?;
            let enabled = matches!(toggle, Toggle::On);
            state
                .admin
                .set_maintenance(enabled, Actor::cli(), &RequestOrigin::default())
                .await?;
            tracing::info!(enabled, "Maintenance mode updated from the command line");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve(config: ControlPlaneConfig) -> Result<(), AppError> {
    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting control plane"
    );

    let addr = config.common.socket_addr()?;
    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );

    let state: AppState = connect(config).await?;
    let app = build_router(state);

    let _guard = service_span.enter();
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
