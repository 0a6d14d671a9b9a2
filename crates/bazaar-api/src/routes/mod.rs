//! # API Route Modules
//!
//! Route groups mounted together under `/api/v1`:
//!
//! - `products` — catalogue search and admin product management.
//! - `auth` — registration, login sessions, logout, current account.
//! - `orders` — order placement and order history.
//! - `payments` — card checkout sessions and the signed gateway callback.

pub mod auth;
pub mod orders;
pub mod payments;
pub mod products;

use axum::Router;

use crate::state::AppState;

/// Merge every route group into one router, to be nested under the API prefix.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(products::router())
        .merge(auth::router())
        .merge(orders::router())
        .merge(payments::router())
}
