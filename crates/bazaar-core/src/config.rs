//! # Runtime Configuration
//!
//! [`AppConfig`] is built once at startup from environment variables and
//! handed to the API crate by value. Nothing else in the workspace reads
//! the environment.
//!
//! Outside production, [`hydrate_env_file`] first loads [`DEV_ENV_FILE`]
//! into the process environment. Variables that are already set win.
//!
//! Variables:
//! - `PORT` (default: 5000)
//! - `BAZAAR_ENV` — `development` or `production` (default: development)
//! - `ALLOWED_ORIGINS` — comma-separated origins (default: the two deployment origins)
//! - `RATE_LIMIT_WINDOW_SECS` (default: 300)
//! - `RATE_LIMIT_MAX` (default: 100)
//! - `TRUST_PROXY_HOPS` (default: 1)
//! - `FRONTEND_DIST` (default: `frontend/dist`)
//! - `DATABASE_URL` (optional)
//! - `PAYMENT_WEBHOOK_SECRET` (optional)
//! - `IMAGE_HOST` (default: `https://res.cloudinary.com`)

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 5000;

/// Origins permitted to make cross-origin browser requests.
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 2] = [
    "http://localhost:5173",
    "https://fullstack-deneme.onrender.com",
];

/// Rate-limit window length.
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Requests a single client may issue per window.
pub const DEFAULT_RATE_LIMIT_MAX: u64 = 100;

/// JSON body ceiling. Product images travel base64-encoded inside the body.
pub const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// External host product images are served from.
pub const DEFAULT_IMAGE_HOST: &str = "https://res.cloudinary.com";

/// Prefix every API route is mounted under.
pub const API_PREFIX: &str = "/api/v1";

/// Variables file loaded in development, relative to the working directory.
pub const DEV_ENV_FILE: &str = "config/config.env";

/// Development or production behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Development,
    Production,
}

impl RunMode {
    /// Return the lowercase name of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::InvalidValue {
                var: "BAZAAR_ENV".to_string(),
                reason: format!("unknown run mode '{other}'"),
            }),
        }
    }
}

/// Fully resolved application configuration.
///
/// Custom `Debug` redacts the database URL and webhook secret.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub mode: RunMode,
    /// Serialized origins (`scheme://host[:port]`, no trailing slash).
    pub allowed_origins: Vec<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u64,
    /// Number of reverse proxies in front of the server whose
    /// `X-Forwarded-For` entries are trusted.
    pub trust_proxy_hops: usize,
    pub body_limit_bytes: usize,
    pub frontend_dist: PathBuf,
    pub database_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub image_host: String,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("mode", &self.mode)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_max", &self.rate_limit_max)
            .field("trust_proxy_hops", &self.trust_proxy_hops)
            .field("body_limit_bytes", &self.body_limit_bytes)
            .field("frontend_dist", &self.frontend_dist)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "[REDACTED]"))
            .field("image_host", &self.image_host)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            mode: RunMode::Development,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW,
            rate_limit_max: DEFAULT_RATE_LIMIT_MAX,
            trust_proxy_hops: 1,
            body_limit_bytes: BODY_LIMIT_BYTES,
            frontend_dist: PathBuf::from("frontend/dist"),
            database_url: None,
            webhook_secret: None,
            image_host: DEFAULT_IMAGE_HOST.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Empty values are treated as absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let allowed_origins = match get("ALLOWED_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(normalize_origin)
                .collect::<Result<Vec<_>, _>>()?,
            None => defaults.allowed_origins,
        };

        let image_host = match get("IMAGE_HOST") {
            Some(raw) => normalize_origin(raw.trim())?,
            None => defaults.image_host,
        };

        let mode = match get("BAZAAR_ENV") {
            Some(raw) => raw.parse()?,
            None => defaults.mode,
        };

        let window_secs: u64 = parse_var(
            &get,
            "RATE_LIMIT_WINDOW_SECS",
            defaults.rate_limit_window.as_secs(),
        )?;
        if window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                var: "RATE_LIMIT_WINDOW_SECS".to_string(),
                reason: "window must be at least one second".to_string(),
            });
        }

        Ok(Self {
            port: parse_var(&get, "PORT", defaults.port)?,
            mode,
            allowed_origins,
            rate_limit_window: Duration::from_secs(window_secs),
            rate_limit_max: parse_var(&get, "RATE_LIMIT_MAX", defaults.rate_limit_max)?,
            trust_proxy_hops: parse_var(&get, "TRUST_PROXY_HOPS", defaults.trust_proxy_hops)?,
            body_limit_bytes: defaults.body_limit_bytes,
            frontend_dist: get("FRONTEND_DIST")
                .map(PathBuf::from)
                .unwrap_or(defaults.frontend_dist),
            database_url: get("DATABASE_URL"),
            webhook_secret: get("PAYMENT_WEBHOOK_SECRET"),
            image_host,
        })
    }

    /// Whether `origin` appears in the allow-list.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.allowed_origins.iter().any(|o| o == origin)
    }
}

/// Load `path` into the process environment unless `BAZAAR_ENV` selects
/// production. A missing file is not an error. Returns whether a file was
/// read.
pub fn hydrate_env_file(path: impl AsRef<Path>) -> Result<bool, ConfigError> {
    let mode = std::env::var("BAZAAR_ENV")
        .ok()
        .and_then(|raw| raw.parse::<RunMode>().ok())
        .unwrap_or_default();
    hydrate_env_file_for(mode, path.as_ref())
}

fn hydrate_env_file_for(mode: RunMode, path: &Path) -> Result<bool, ConfigError> {
    if mode.is_production() {
        return Ok(false);
    }
    match dotenvy::from_filename(path) {
        Ok(_) => Ok(true),
        Err(dotenvy::Error::Io(err)) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(ConfigError::EnvFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_var<T, G>(get: &G, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Reduce a URL to its serialized origin, rejecting anything that has no
/// tuple origin (e.g. `data:` or `file:` URLs).
fn normalize_origin(raw: &str) -> Result<String, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidOrigin(raw.to_string(), e.to_string()))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(ConfigError::InvalidOrigin(
            raw.to_string(),
            "URL has no network origin".to_string(),
        ));
    }
    Ok(origin.ascii_serialization())
}
