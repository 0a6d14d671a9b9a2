//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! ## Architecture
//!
//! AppState holds:
//! - **Config** — the [`AppConfig`] built once in `main`.
//! - **Database pool** — the long-lived connection established at startup
//!   (absent when no `DATABASE_URL` is configured).
//! - **Rate limiter** — the process-wide per-client request counters.
//! - **Route collaborator stores** — products, users, sessions, orders and
//!   checkout sessions, kept in memory.

use std::collections::HashMap;
use std::sync::Arc;

use bazaar_core::AppConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::middleware::rate_limit::{RateLimitConfig, RateLimiter};

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// All operations are synchronous (the RwLock is `parking_lot`, not `tokio::sync`)
/// because we never hold the lock across `.await` points.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        self.data.write().insert(id, value)
    }

    /// Insert `value` unless some record already matches `conflicts`.
    ///
    /// The check and the insert share one write guard. Returns `false`
    /// (and leaves the store untouched) on conflict.
    pub fn insert_unless(&self, conflicts: impl Fn(&T) -> bool, id: Uuid, value: T) -> bool {
        let mut data = self.data.write();
        if data.values().any(conflicts) {
            return false;
        }
        data.insert(id, value);
        true
    }

    /// Keep only the records matching `keep`, returning how many were dropped.
    pub fn retain(&self, keep: impl Fn(&T) -> bool) -> usize {
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|_, v| keep(v));
        before - data.len()
    }

    /// Retrieve a record by ID.
    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Return the first record matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.data.read().values().find(|v| predicate(v)).cloned()
    }

    /// Atomically read-validate-update a record.
    ///
    /// Returns `None` if the record doesn't exist, or `Some(result)` with
    /// the closure's `Result`.
    pub fn try_update<R, E>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(id).map(f)
    }

    /// Remove a record by ID.
    pub fn remove(&self, id: &Uuid) -> Option<T> {
        self.data.write().remove(id)
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

// -- Records ------------------------------------------------------------------

/// Product categories accepted by the catalogue.
pub const PRODUCT_CATEGORIES: [&str; 10] = [
    "Electronics",
    "Cameras",
    "Laptops",
    "Accessories",
    "Headphones",
    "Food",
    "Books",
    "Sports",
    "Outdoor",
    "Home",
];

/// Image reference on the external image host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImage {
    pub public_id: String,
    pub url: String,
}

/// Catalogue entry. Prices are integer minor units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price_cents: u64,
    pub category: String,
    pub seller: String,
    pub stock: u32,
    pub images: Vec<ProductImage>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

/// Registered account. The password hash never leaves the process.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Public view of a [`UserRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&UserRecord> for UserView {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// Login session, keyed by its opaque token.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub address: String,
    pub city: String,
    pub phone_no: String,
    pub zip_code: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub price_cents: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "COD")]
    CashOnDelivery,
    #[serde(rename = "Card")]
    Card,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub shipping_info: ShippingInfo,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub items_price_cents: u64,
    pub tax_cents: u64,
    pub shipping_cents: u64,
    pub total_cents: u64,
    pub order_status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Open,
    Completed,
}

/// Payment-gateway checkout opened for a card order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: u64,
    pub status: CheckoutStatus,
    pub created_at: DateTime<Utc>,
}

// -- Application State --------------------------------------------------------

/// Shared application state. Cloning is cheap: every field is a handle.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: Option<PgPool>,
    pub limiter: RateLimiter,
    pub products: Store<ProductRecord>,
    pub users: Store<UserRecord>,
    pub sessions: Store<SessionRecord>,
    pub orders: Store<OrderRecord>,
    pub checkouts: Store<CheckoutRecord>,
}

impl AppState {
    /// Default configuration, no database.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), None)
    }

    pub fn with_config(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: config.rate_limit_max,
            window: config.rate_limit_window,
            trust_proxy_hops: config.trust_proxy_hops,
        });
        Self {
            config: Arc::new(config),
            db_pool,
            limiter,
            products: Store::new(),
            users: Store::new(),
            sessions: Store::new(),
            orders: Store::new(),
            checkouts: Store::new(),
        }
    }

    /// Look up an account by email, case-insensitively.
    pub fn user_by_email(&self, email: &str) -> Option<UserRecord> {
        self.users.find(|u| u.email.eq_ignore_ascii_case(email))
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
