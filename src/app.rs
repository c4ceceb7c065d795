use crate::config::Config;
use crate::ranking::RankingApi;
use crate::state::AppState;
use crate::web;
use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
}

impl App {
    /// Create a new App instance with all necessary components initialized
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let connect_options = sqlx::postgres::PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(
            min_connections = 0,
            max_connections = 8,
            acquire_timeout = "4s",
            idle_timeout = "2m",
            max_lifetime = "30m",
            "database pool established"
        );

        let ranking_api = Arc::new(RankingApi::new().context("Failed to create ranking client")?);

        let app_state = AppState::new(db_pool, ranking_api);

        Ok(App { config, app_state })
    }

    /// Bind the listener and serve until a shutdown signal arrives.
    pub async fn run(self) -> ExitCode {
        let router = web::create_router(self.app_state.clone());
        let addr = format!("0.0.0.0:{}", self.config.port);

        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %addr, error = ?e, "Failed to bind listener");
                return ExitCode::FAILURE;
            }
        };
        info!(addr = %addr, "web server listening");

        // Graceful shutdown: stop accepting, drain in-flight requests, then
        // give the pool a bounded window to close.
        let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
        if let Err(e) = serve.await {
            error!(error = ?e, "web server exited with error");
            return ExitCode::FAILURE;
        }

        let shutdown_timeout = Duration::from_secs(self.config.shutdown_timeout);
        let _ = tokio::time::timeout(shutdown_timeout, self.app_state.db_pool.close()).await;
        info!("web server stopped cleanly");
        ExitCode::SUCCESS
    }
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = ?e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
