//! # Database Connector
//!
//! The connection is **optional**. When `DATABASE_URL` is set, the pool is
//! established at startup and any connection failure is fatal. When it is
//! absent, the API runs with its in-memory stores only.
//!
//! A supervised [`watchdog`] probes the pool while the server runs; losing
//! the database for several consecutive probes is treated as an
//! unrecoverable background failure.

use std::time::Duration;

use bazaar_core::AppConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Interval between watchdog probes.
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);
/// Consecutive failed probes after which the watchdog gives up.
pub const WATCHDOG_MAX_FAILURES: u32 = 3;

/// Errors surfaced by the database watchdog.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database unreachable after {failures} consecutive probes: {source}")]
    Unreachable {
        failures: u32,
        #[source]
        source: sqlx::Error,
    },
}

/// Establish the connection pool.
///
/// Returns `None` if no database URL is configured (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection fails.
pub async fn init_pool(config: &AppConfig) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!(
            "DATABASE_URL not set, running in-memory only mode. \
             State will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");
    Ok(Some(pool))
}

/// Round-trip a trivial query.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Probe `pool` every `interval`; return `Err` after
/// [`WATCHDOG_MAX_FAILURES`] consecutive failures. Never returns `Ok`.
pub async fn watchdog(pool: PgPool, interval: Duration) -> Result<(), DbError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let mut failures = 0_u32;
    loop {
        ticker.tick().await;
        match ping(&pool).await {
            Ok(()) => {
                if failures > 0 {
                    tracing::info!(failures, "database reachable again");
                }
                failures = 0;
            }
            Err(source) => {
                failures += 1;
                tracing::warn!(failures, error = %source, "database probe failed");
                if failures >= WATCHDOG_MAX_FAILURES {
                    return Err(DbError::Unreachable { failures, source });
                }
            }
        }
    }
}
