//! # JSON Body Parsing
//!
//! Buffers JSON request bodies up to the configured ceiling, rejects
//! oversized (413) or malformed (400) payloads before any handler runs, and
//! keeps the exact received bytes as a [`RawBody`] request extension.
//! Payment callbacks verify their signatures over those bytes, so they are
//! stored before the sanitisers rewrite the body.
//!
//! Non-JSON requests pass through untouched.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use http_body_util::LengthLimitError;

use crate::error::AppError;

/// Body ceiling injected into request extensions.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimit(pub usize);

impl Default for BodyLimit {
    fn default() -> Self {
        Self(bazaar_core::BODY_LIMIT_BYTES)
    }
}

/// The parsed document, handed to the sanitiser so the body is decoded once.
#[derive(Debug, Clone)]
pub(crate) struct JsonDocument(pub serde_json::Value);

/// The request body exactly as received. Empty when the request carried no
/// JSON body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBody(pub Bytes);

impl<S: Send + Sync> FromRequestParts<S> for RawBody {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<RawBody>().cloned().unwrap_or_default())
    }
}

/// `application/json` or any `application/*+json` media type.
pub(crate) fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let essence = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Collect a body, refusing anything past `limit` bytes.
pub(crate) async fn read_bounded(body: Body, limit: usize) -> Result<Bytes, AppError> {
    axum::body::to_bytes(body, limit).await.map_err(|err| {
        let inner = err.into_inner();
        if inner.is::<LengthLimitError>() {
            AppError::PayloadTooLarge { limit }
        } else {
            AppError::BadRequest(format!("failed to read request body: {inner}"))
        }
    })
}

/// Buffer and validate JSON bodies against the [`BodyLimit`] extension.
///
/// Stores the received bytes as [`RawBody`] and the parsed document for the
/// sanitiser. This is the only place the body ceiling is enforced; handlers
/// run with the extractor limit disabled, since escaping may grow the body.
pub async fn json_body_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    if !is_json_content_type(request.headers()) {
        return Ok(next.run(request).await);
    }

    let BodyLimit(limit) = request
        .extensions()
        .get::<BodyLimit>()
        .copied()
        .unwrap_or_default();

    if declared_length(request.headers()).is_some_and(|len| len > limit) {
        return Err(AppError::PayloadTooLarge { limit });
    }

    let (mut parts, body) = request.into_parts();
    let bytes = read_bounded(body, limit).await?;

    if !bytes.is_empty() {
        let document: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::BadRequest(format!("malformed JSON body: {e}")))?;
        if !(document.is_object() || document.is_array()) {
            return Err(AppError::BadRequest(
                "JSON body must be an object or an array".into(),
            ));
        }
        parts.extensions.insert(JsonDocument(document));
    }

    parts.extensions.insert(RawBody(bytes.clone()));
    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
