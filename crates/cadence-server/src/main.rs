//! Cadence server binary.
//!
//! Starts an axum HTTP server with structured logging, database initialization,
//! and graceful shutdown on SIGTERM/SIGINT.

use cadence_server::auth::JwtAuthenticator;
use cadence_server::config::{self, Config};
use cadence_server::registry::ConnectionRegistry;
use cadence_server::transcript_log::SqliteTranscriptLog;
use cadence_server::{app, AppState};
use cadence_voice::{VoiceError, VoiceServices};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum StartupError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("auth.secret is empty; set it in the config file or CADENCE_JWT_SECRET")]
    MissingSecret,
    #[error("failed to create database pool: {0}")]
    Pool(#[from] cadence_db::PoolError),
    #[error("failed to get database connection for migrations: {0}")]
    Connection(#[from] r2d2::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(#[from] cadence_db::MigrationError),
    #[error("invalid provider configuration: {0}")]
    Providers(#[from] VoiceError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CADENCE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Opens the database, applies migrations and wires the adapters.
fn build_state(config: &Config) -> Result<AppState, StartupError> {
    if config.auth.secret.trim().is_empty() {
        return Err(StartupError::MissingSecret);
    }
    if config.providers.api_key.trim().is_empty() {
        tracing::warn!("providers.api_key is empty; provider calls will be rejected");
    }

    let pool = cadence_db::create_pool(
        &config.database.path,
        cadence_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )?;

    {
        let conn = pool.get()?;
        let applied = cadence_db::run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let voice = VoiceServices::from_config(&config.providers)?;

    Ok(AppState {
        authenticator: JwtAuthenticator::new(&config.auth.secret, config.auth.token_ttl_secs),
        auth: Arc::new(config.auth.clone()),
        agent: Arc::new(config.agent.clone()),
        voice,
        transcripts: Arc::new(SqliteTranscriptLog::new(pool.clone())),
        registry: ConnectionRegistry::new(),
        pool,
    })
}

async fn run() -> Result<(), StartupError> {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)?;

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let state = build_state(&config)?;
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting cadence server");

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(StartupError::Serve)?;

    tracing::info!("cadence server shut down");
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Tracing may not be initialized yet.
        eprintln!("cadence-server: {}", e);
        std::process::exit(1);
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
