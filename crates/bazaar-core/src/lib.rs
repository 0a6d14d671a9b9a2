//! # bazaar-core — Foundational Types for the Bazaar Backend
//!
//! The leaf of the workspace: it depends on no other `bazaar-*` crate and
//! carries no HTTP types. It defines:
//!
//! - [`config::AppConfig`] — the single configuration struct built at
//!   startup and passed to whatever assembles the middleware chain.
//! - [`error::ConfigError`] — why configuration could not be resolved.
//! - [`sanitize`] — the operator-stripping and markup-neutralising passes
//!   applied to untrusted request input.
//!
//! ## Crate Policy
//!
//! - No `unsafe` code.
//! - No `.unwrap()` outside tests.

pub mod config;
pub mod error;
pub mod sanitize;

pub use config::{hydrate_env_file, AppConfig, RunMode, API_PREFIX, BODY_LIMIT_BYTES, DEV_ENV_FILE};
pub use error::ConfigError;
