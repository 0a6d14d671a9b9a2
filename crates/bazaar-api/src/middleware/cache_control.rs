//! # API Cache Control
//!
//! Every response under the API prefix is marked non-storable and
//! immediately stale, whatever the handler produced.

use axum::extract::Request;
use axum::http::{header, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use bazaar_core::API_PREFIX;

const NO_STORE: &str = "no-store, no-cache, must-revalidate, proxy-revalidate";

/// The four headers stamped on API responses.
pub fn api_no_cache_headers() -> [(HeaderName, HeaderValue); 4] {
    [
        (header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE)),
        (header::PRAGMA, HeaderValue::from_static("no-cache")),
        (header::EXPIRES, HeaderValue::from_static("0")),
        (
            HeaderName::from_static("surrogate-control"),
            HeaderValue::from_static("no-store"),
        ),
    ]
}

fn is_api_path(path: &str) -> bool {
    path.strip_prefix(API_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Stamp [`api_no_cache_headers`] on responses to paths under the API prefix.
pub async fn api_cache_control_middleware(request: Request, next: Next) -> Response {
    let api = is_api_path(request.uri().path());
    let mut response = next.run(request).await;
    if api {
        let headers = response.headers_mut();
        for (name, value) in api_no_cache_headers() {
            headers.insert(name, value);
        }
    }
    response
}
