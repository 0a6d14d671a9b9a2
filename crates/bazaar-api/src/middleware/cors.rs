//! # Origin Gate & CORS
//!
//! Two cooperating pieces:
//!
//! - [`origin_gate_middleware`] refuses any request whose `Origin` header is
//!   present and not in the allow-list. Requests without an `Origin`
//!   (server-to-server calls, same-origin navigation, curl) pass.
//! - [`cors_layer`] answers preflights and decorates responses to allowed
//!   origins with the CORS headers browsers need, credentials included.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use bazaar_core::AppConfig;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::error::AppError;

/// Origins permitted to make cross-origin requests, injected into request
/// extensions.
#[derive(Debug, Clone)]
pub struct OriginAllowList(Arc<AppConfig>);

impl OriginAllowList {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self(config)
    }

    /// An absent (or empty) origin is always allowed.
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match origin {
            None | Some("") => true,
            Some(origin) => self.0.origin_allowed(origin),
        }
    }
}

/// Reject requests from origins outside the allow-list.
pub async fn origin_gate_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    if let Some(allow_list) = request.extensions().get::<OriginAllowList>() {
        let origin = match request.headers().get(header::ORIGIN) {
            None => None,
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| AppError::OriginRejected("<non-ascii origin>".into()))?,
            ),
        };
        if !allow_list.permits(origin) {
            return Err(AppError::OriginRejected(
                origin.unwrap_or_default().to_string(),
            ));
        }
    }
    Ok(next.run(request).await)
}

/// Build the CORS layer for the configured allow-list.
pub fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(origin = %o, error = %e, "skipping unrepresentable origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::PATCH,
            Method::POST,
            Method::DELETE,
        ])
        .allow_headers(AllowHeaders::mirror_request())
}
