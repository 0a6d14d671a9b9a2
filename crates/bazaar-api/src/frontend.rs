//! # Static Frontend
//!
//! In production the compiled single-page bundle is served for every
//! unmatched `GET`/`HEAD`: real files from the bundle directory, anything
//! else answered with `index.html` so client-side routing can take over.
//! Assets are cacheable for a day; HTML must always be revalidated.
//!
//! Everything that falls through otherwise becomes a uniform 404.

use std::path::Path;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};

use crate::error::AppError;

const ASSET_CACHE: &str = "public, max-age=86400";
const HTML_CACHE: &str = "no-cache";

/// The bundle directory with its `index.html` fallback.
#[derive(Debug, Clone)]
pub struct Frontend {
    service: ServeDir<ServeFile>,
}

impl Frontend {
    pub fn new(dist: impl AsRef<Path>) -> Self {
        let dist = dist.as_ref();
        Self {
            service: ServeDir::new(dist).fallback(ServeFile::new(dist.join("index.html"))),
        }
    }

    /// Serve `request` from the bundle.
    pub async fn serve(&self, request: Request) -> Response {
        let response = match self.service.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };
        let mut response = response.map(Body::new);
        apply_cache_policy(&mut response);
        response
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

fn apply_cache_policy(response: &mut Response) {
    let status = response.status();
    if !(status.is_success() || status == StatusCode::NOT_MODIFIED) {
        return;
    }
    let policy = if is_html(response) { HTML_CACHE } else { ASSET_CACHE };
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(policy));
}

/// Router fallback: the bundle for `GET`/`HEAD` when one is configured,
/// otherwise a 404 naming the path.
pub async fn fallback(frontend: Option<Frontend>, request: Request) -> Response {
    let method = request.method();
    if let Some(frontend) = frontend {
        if method == Method::GET || method == Method::HEAD {
            return frontend.serve(request).await;
        }
    }
    AppError::NotFound(format!("Route {} not found", request.uri().path())).into_response()
}
