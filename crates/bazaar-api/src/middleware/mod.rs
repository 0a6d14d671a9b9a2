//! # Middleware
//!
//! The request pipeline, outermost first:
//!
//! - `tracing_layer` — one span per request.
//! - `security_headers` — hardening headers and the content policy.
//! - `cache_control` — no-store headers on every API response.
//! - `cors` — origin allow-list gate and CORS response headers.
//! - `rate_limit` — fixed-window per-client budget.
//! - `body` — bounded JSON parsing, retaining the raw bytes.
//! - `sanitize` — operator-key stripping and markup neutralisation.
//!
//! Cookies are parsed on demand by the `axum_extra::extract::CookieJar`
//! extractor rather than by a middleware stage.

pub mod body;
pub mod cache_control;
pub mod cors;
pub mod rate_limit;
pub mod sanitize;
pub mod security_headers;
pub mod tracing_layer;
