//! # Error Types
//!
//! Errors raised while resolving configuration. Startup aborts on any of
//! them; there is no partial configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A variable was present but could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },

    /// An origin in the allow-list (or the image host) is not a valid
    /// network origin.
    #[error("invalid origin '{0}': {1}")]
    InvalidOrigin(String, String),

    /// The development variables file exists but could not be read.
    #[error("failed to load {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}
