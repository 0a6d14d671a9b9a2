//! # bazaar-api binary
//!
//! Loads configuration, installs the fail-fast panic hook, connects the
//! database, starts the supervised background tasks and serves until a
//! termination signal or a task failure.

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::Context;
use bazaar_api::routes::auth;
use bazaar_api::state::AppState;
use bazaar_api::{app, db, process, server};
use bazaar_core::{AppConfig, DEV_ENV_FILE};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: AppConfig) -> anyhow::Result<ExitCode> {
    let db_pool = db::init_pool(&config)
        .await
        .context("database connection failed")?;

    let state = AppState::with_config(config, db_pool.clone());

    let (supervisor, failures) = server::supervisor();
    supervisor.spawn("rate-limit-purge", state.limiter.clone().run_purge());
    supervisor.spawn(
        "session-purge",
        auth::run_session_purge(state.sessions.clone(), auth::SESSION_PURGE_INTERVAL),
    );
    if let Some(pool) = &db_pool {
        supervisor.spawn("db-watchdog", db::watchdog(pool.clone(), db::WATCHDOG_INTERVAL));
    }

    let port = state.config.port;
    let mode = state.config.mode;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Server started on PORT: {port} in {mode} mode.");

    let reason = server::serve(listener, app(state), server::shutdown_trigger(failures)).await?;

    if let Some(pool) = db_pool {
        pool.close().await;
        tracing::info!("database pool closed");
    }
    tracing::info!(%reason, "shutdown complete");
    Ok(reason.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_file = bazaar_core::hydrate_env_file(DEV_ENV_FILE);
    let config = AppConfig::from_env();
    init_tracing(matches!(&config, Ok(c) if c.mode.is_production()));
    process::install_panic_hook();

    match env_file {
        Ok(true) => tracing::info!("loaded variables from {DEV_ENV_FILE}"),
        Ok(false) => {}
        Err(err) => {
            tracing::error!("{err}");
            return ExitCode::FAILURE;
        }
    }

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "configuration loaded");

    match run(config).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
