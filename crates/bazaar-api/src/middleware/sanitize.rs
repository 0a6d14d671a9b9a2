//! # Request Sanitisation
//!
//! Runs both input sanitisers from [`bazaar_core::sanitize`] over every
//! request before it reaches route logic: the query string, header names,
//! and (for JSON requests) the body handed to handlers.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderName, Uri};
use axum::middleware::Next;
use axum::response::Response;
use bazaar_core::sanitize::{sanitize_json, sanitize_query};

use crate::error::AppError;
use crate::middleware::body::JsonDocument;

fn with_query(uri: &Uri, query: &str) -> Result<Uri, AppError> {
    let path_and_query = if query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{query}", uri.path())
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        path_and_query
            .parse()
            .map_err(|e| AppError::BadRequest(format!("invalid request target: {e}")))?,
    );
    Uri::from_parts(parts).map_err(|e| AppError::BadRequest(format!("invalid request target: {e}")))
}

/// Strip operator keys and escape markup in the header names, query string
/// and JSON body before route logic runs.
///
/// The body is taken from the document [`json_body_middleware`] already
/// parsed and is re-encoded only when sanitising changed it.
///
/// [`json_body_middleware`]: crate::middleware::body::json_body_middleware
pub async fn sanitize_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();

    let operator_headers: Vec<HeaderName> = parts
        .headers
        .keys()
        .filter(|name| name.as_str().starts_with('$'))
        .cloned()
        .collect();
    for name in &operator_headers {
        parts.headers.remove(name);
    }

    if let Some(clean) = parts.uri.query().and_then(sanitize_query) {
        tracing::debug!(path = %parts.uri.path(), "sanitised query string");
        parts.uri = with_query(&parts.uri, &clean)?;
    }

    let body = match parts.extensions.remove::<JsonDocument>() {
        Some(JsonDocument(mut document)) => {
            let original = document.clone();
            let removed = sanitize_json(&mut document);
            if document == original {
                body
            } else {
                if removed > 0 {
                    tracing::warn!(removed, path = %parts.uri.path(), "stripped operator keys from body");
                }
                let rewritten = serde_json::to_vec(&document)
                    .map_err(|e| AppError::Internal(format!("re-encoding sanitised body: {e}")))?;
                parts.headers.remove(header::CONTENT_LENGTH);
                Body::from(rewritten)
            }
        }
        None => body,
    };

    Ok(next.run(Request::from_parts(parts, body)).await)
}
