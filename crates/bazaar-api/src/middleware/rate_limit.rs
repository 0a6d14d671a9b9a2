//! # Per-Client Rate Limiting
//!
//! Fixed-window counter keyed by client address. A client's first request
//! opens its window; up to `max_requests` pass inside it and the rest are
//! refused with 429 until the window elapses and the count resets.
//!
//! Every response carries `X-RateLimit-Limit`, `X-RateLimit-Remaining` and
//! `X-RateLimit-Reset` (seconds until the window resets).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;

use crate::error::AppError;

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Key used when no client address can be determined.
const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u64,
    /// Window duration.
    pub window: Duration,
    /// Reverse proxies whose `X-Forwarded-For` entries are trusted.
    pub trust_proxy_hops: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: bazaar_core::config::DEFAULT_RATE_LIMIT_MAX,
            window: bazaar_core::config::DEFAULT_RATE_LIMIT_WINDOW,
            trust_proxy_hops: 1,
        }
    }
}

/// Per-key rate limit state.
#[derive(Debug, Clone)]
struct BucketState {
    count: u64,
    window_start: Instant,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the client's window resets.
    pub reset_after: Duration,
}

/// Shared rate limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count a request from `key` now.
    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// Count a request from `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(BucketState {
            count: 0,
            window_start: now,
        });

        if now.saturating_duration_since(bucket.window_start) >= self.config.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        let reset_after = self
            .config
            .window
            .saturating_sub(now.saturating_duration_since(bucket.window_start));

        let allowed = bucket.count < self.config.max_requests;
        if allowed {
            bucket.count += 1;
        }

        RateDecision {
            allowed,
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(bucket.count),
            reset_after,
        }
    }

    /// Drop buckets whose window ended before `now`. Returns how many were dropped.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.window_start) < self.config.window);
        before - buckets.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Periodically purge expired buckets. Runs until the task is dropped.
    pub async fn run_purge(self) -> Result<(), std::convert::Infallible> {
        let mut ticker = tokio::time::interval(self.config.window);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = self.purge_expired_at(Instant::now());
            if purged > 0 {
                tracing::debug!(purged, "purged expired rate-limit windows");
            }
        }
    }
}

/// Resolve the client address the way a server behind `hops` trusted
/// proxies should: walk `X-Forwarded-For` from the right, skipping one
/// entry per trusted hop. The peer socket address counts as the first hop.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>, hops: usize) -> String {
    let mut chain: Vec<String> = vec![peer
        .map(|p| p.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())];

    if hops > 0 {
        let forwarded = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        chain.extend(forwarded.into_iter().rev());
    }

    chain
        .get(hops)
        .or_else(|| chain.last())
        .cloned()
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    let pairs = [
        (LIMIT_HEADER, decision.limit),
        (REMAINING_HEADER, decision.remaining),
        (RESET_HEADER, decision.reset_after.as_secs()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(name, value);
        }
    }
}

/// Middleware that enforces per-client rate limits.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let Some(limiter) = request.extensions().get::<RateLimiter>().cloned() else {
        return next.run(request).await;
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_address(request.headers(), peer, limiter.config.trust_proxy_hops);
    let decision = limiter.check(&key);

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, "rate limit exceeded");
        AppError::TooManyRequests {
            retry_after: decision.reset_after,
        }
        .into_response()
    };

    apply_headers(response.headers_mut(), &decision);
    response
}
