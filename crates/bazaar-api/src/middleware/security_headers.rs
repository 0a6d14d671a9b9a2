//! # Security Headers
//!
//! Applies the standard hardening header set to every response, including
//! a content-security policy whose `img-src` admits same-origin images,
//! inline `data:` URIs and the external image host. Headers a handler has
//! already set are left alone.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

/// Content-security policy built from the default directive set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSecurityPolicy {
    directives: Vec<(String, Vec<String>)>,
}

impl Default for ContentSecurityPolicy {
    fn default() -> Self {
        let defaults: [(&str, &[&str]); 11] = [
            ("default-src", &["'self'"]),
            ("base-uri", &["'self'"]),
            ("font-src", &["'self'", "https:", "data:"]),
            ("form-action", &["'self'"]),
            ("frame-ancestors", &["'self'"]),
            ("img-src", &["'self'", "data:"]),
            ("object-src", &["'none'"]),
            ("script-src", &["'self'"]),
            ("script-src-attr", &["'none'"]),
            ("style-src", &["'self'", "https:", "'unsafe-inline'"]),
            ("upgrade-insecure-requests", &[]),
        ];
        Self {
            directives: defaults
                .iter()
                .map(|(name, values)| {
                    (
                        name.to_string(),
                        values.iter().map(|v| v.to_string()).collect(),
                    )
                })
                .collect(),
        }
    }
}

impl ContentSecurityPolicy {
    /// Replace (or add) one directive.
    pub fn directive<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        match self.directives.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.directives.push((name.to_string(), values)),
        }
        self
    }

    /// Serialize to a header value: `name v1 v2;name2 ...`.
    pub fn render(&self) -> String {
        self.directives
            .iter()
            .map(|(name, values)| {
                if values.is_empty() {
                    name.clone()
                } else {
                    format!("{name} {}", values.join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// The header set applied to every response, injected into request
/// extensions.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
}

impl SecurityHeaders {
    /// Build the header set with `image_host` admitted by `img-src`.
    pub fn new(image_host: &str) -> Self {
        let csp = ContentSecurityPolicy::default()
            .directive("img-src", ["'self'", "data:", image_host]);
        Self::with_policy(&csp)
    }

    pub fn with_policy(csp: &ContentSecurityPolicy) -> Self {
        let fixed: [(&'static str, &'static str); 11] = [
            ("cross-origin-opener-policy", "same-origin"),
            ("cross-origin-resource-policy", "same-origin"),
            ("origin-agent-cluster", "?1"),
            ("referrer-policy", "no-referrer"),
            ("strict-transport-security", "max-age=15552000; includeSubDomains"),
            ("x-content-type-options", "nosniff"),
            ("x-dns-prefetch-control", "off"),
            ("x-download-options", "noopen"),
            ("x-frame-options", "SAMEORIGIN"),
            ("x-permitted-cross-domain-policies", "none"),
            ("x-xss-protection", "0"),
        ];

        let mut headers: Vec<(HeaderName, HeaderValue)> = fixed
            .into_iter()
            .map(|(n, v)| (HeaderName::from_static(n), HeaderValue::from_static(v)))
            .collect();

        match HeaderValue::from_str(&csp.render()) {
            Ok(value) => headers.push((HeaderName::from_static("content-security-policy"), value)),
            Err(e) => tracing::error!(error = %e, "content-security-policy is not a valid header value"),
        }

        Self {
            headers: Arc::new(headers),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(HeaderName, HeaderValue)> {
        self.headers.iter()
    }
}

/// Apply the configured security headers to the response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let security = request.extensions().get::<SecurityHeaders>().cloned();
    let mut response = next.run(request).await;

    if let Some(security) = security {
        let headers = response.headers_mut();
        for (name, value) in security.iter() {
            if !headers.contains_key(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
    }

    response
}
