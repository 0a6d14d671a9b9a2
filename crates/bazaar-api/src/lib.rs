//! # bazaar-api — Axum HTTP Service for the Bazaar Storefront
//!
//! One HTTP listener serves the JSON API under `/api/v1` and, in
//! production, the compiled single-page frontend for everything else.
//!
//! ## API Surface
//!
//! | Prefix                   | Module                | Domain            |
//! |--------------------------|-----------------------|-------------------|
//! | `/api/v1/products*`      | [`routes::products`]  | Catalogue         |
//! | `/api/v1/admin/products*`| [`routes::products`]  | Catalogue (admin) |
//! | `/api/v1/register` etc.  | [`routes::auth`]      | Accounts          |
//! | `/api/v1/orders*`        | [`routes::orders`]    | Orders            |
//! | `/api/v1/payment/*`      | [`routes::payments`]  | Payments          |
//! | `/health/*`              | here                  | Probes            |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → RequestScope → SecurityHeaders → ApiCacheControl → CatchPanic
//!   → OriginGate → Cors → RateLimit → JsonBody → Sanitize → Handler / Fallback
//! ```
//!
//! Any stage may fail with an [`error::AppError`]; it short-circuits the
//! rest of the chain and renders the uniform error body.

pub mod db;
pub mod error;
pub mod extractors;
pub mod frontend;
pub mod middleware;
pub mod process;
pub mod routes;
pub mod server;
pub mod state;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::routing::get;
use axum::{Extension, Router};
use bazaar_core::API_PREFIX;
use tower_http::catch_panic::CatchPanicLayer;

use crate::frontend::Frontend;
use crate::middleware::body::BodyLimit;
use crate::middleware::cors::OriginAllowList;
use crate::middleware::security_headers::SecurityHeaders;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let config = state.config.clone();
    let bundle = config
        .mode
        .is_production()
        .then(|| Frontend::new(&config.frontend_dist));

    let health = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness));

    Router::new()
        .merge(health)
        .nest(API_PREFIX, routes::api_router())
        .fallback(move |request: Request| frontend::fallback(bundle.clone(), request))
        // The ceiling applies to the received body in `json_body_middleware`;
        // escaped bodies handed to extractors may be larger.
        .layer(DefaultBodyLimit::disable())
        .layer(from_fn(middleware::sanitize::sanitize_middleware))
        .layer(from_fn(middleware::body::json_body_middleware))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(middleware::cors::cors_layer(&config))
        .layer(from_fn(middleware::cors::origin_gate_middleware))
        .layer(CatchPanicLayer::custom(process::panic_response))
        .layer(from_fn(middleware::cache_control::api_cache_control_middleware))
        .layer(from_fn(middleware::security_headers::security_headers_middleware))
        .layer(from_fn(process::request_scope_middleware))
        .layer(middleware::tracing_layer::layer())
        .layer(Extension(BodyLimit(config.body_limit_bytes)))
        .layer(Extension(state.limiter.clone()))
        .layer(Extension(OriginAllowList::new(config.clone())))
        .layer(Extension(SecurityHeaders::new(&config.image_host)))
        .with_state(state)
}

/// Liveness probe: 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 503 when a configured database does not answer.
async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let Some(pool) = &state.db_pool else {
        return (StatusCode::OK, "ready");
    };
    match db::ping(pool).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(err) => {
            tracing::warn!(error = %err, "readiness probe: database unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}
