//! # Order API
//!
//! - `POST /orders/new`    — place an order for the logged-in account
//! - `GET  /orders/{id}`   — one order (owner or admin)
//! - `GET  /me/orders`     — the caller's orders, newest first
//! - `GET  /admin/orders`  — every order plus the grand total (admin)
//!
//! Prices always come from the catalogue, never from the request. Placing
//! an order reserves stock for every line or for none of them.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::extractors::{extract_path, extract_validated_json, AdminUser, CurrentUser, Validate};
use crate::state::{
    AppState, OrderItem, OrderRecord, PaymentMethod, PaymentStatus, Role, ShippingInfo,
};

/// Orders at or above this subtotal ship free.
pub const FREE_SHIPPING_THRESHOLD_CENTS: u64 = 20_000;
pub const SHIPPING_FEE_CENTS: u64 = 2_500;
pub const TAX_PERCENT: u64 = 15;

const INITIAL_ORDER_STATUS: &str = "Processing";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders/new", post(new_order))
        .route("/orders/{id}", get(get_order))
        .route("/me/orders", get(my_orders))
        .route("/admin/orders", get(all_orders))
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct NewOrderRequest {
    pub items: Vec<NewOrderLine>,
    pub shipping_info: ShippingInfo,
    pub payment_method: PaymentMethod,
}

impl Validate for NewOrderRequest {
    fn validate(&self) -> Result<(), String> {
        if self.items.is_empty() {
            return Err("Order must contain at least one item".into());
        }
        if self.items.iter().any(|line| line.quantity == 0) {
            return Err("Item quantity must be at least 1".into());
        }
        let info = &self.shipping_info;
        for (field, value) in [
            ("address", &info.address),
            ("city", &info.city),
            ("phone_no", &info.phone_no),
            ("zip_code", &info.zip_code),
            ("country", &info.country),
        ] {
            if value.trim().is_empty() {
                return Err(format!("shipping_info.{field} is required"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AllOrdersResponse {
    pub total_amount_cents: u64,
    pub orders: Vec<OrderRecord>,
}

/// Subtotal, tax, shipping and grand total for a set of priced lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub items_price_cents: u64,
    pub tax_cents: u64,
    pub shipping_cents: u64,
    pub total_cents: u64,
}

pub fn order_totals(items: &[OrderItem]) -> OrderTotals {
    let items_price_cents: u64 = items
        .iter()
        .map(|item| item.price_cents.saturating_mul(u64::from(item.quantity)))
        .fold(0, u64::saturating_add);
    let shipping_cents = if items_price_cents >= FREE_SHIPPING_THRESHOLD_CENTS {
        0
    } else {
        SHIPPING_FEE_CENTS
    };
    let tax_cents = items_price_cents.saturating_mul(TAX_PERCENT) / 100;
    OrderTotals {
        items_price_cents,
        tax_cents,
        shipping_cents,
        total_cents: items_price_cents + tax_cents + shipping_cents,
    }
}

/// Take `quantity` units of each line out of stock, all or nothing.
fn reserve_stock(state: &AppState, lines: &[NewOrderLine]) -> Result<Vec<OrderItem>, AppError> {
    let mut reserved: Vec<OrderItem> = Vec::with_capacity(lines.len());
    for line in lines {
        let outcome = state
            .products
            .try_update(&line.product_id, |product| {
                if product.stock < line.quantity {
                    return Err(AppError::Conflict(format!(
                        "Insufficient stock for {}",
                        product.name
                    )));
                }
                product.stock -= line.quantity;
                Ok(OrderItem {
                    product_id: product.id,
                    name: product.name.clone(),
                    quantity: line.quantity,
                    price_cents: product.price_cents,
                })
            })
            .unwrap_or_else(|| Err(AppError::NotFound(format!("product {}", line.product_id))));

        match outcome {
            Ok(item) => reserved.push(item),
            Err(err) => {
                release_stock(state, &reserved);
                return Err(err);
            }
        }
    }
    Ok(reserved)
}

fn release_stock(state: &AppState, items: &[OrderItem]) {
    for item in items {
        state.products.try_update(&item.product_id, |product| {
            product.stock = product.stock.saturating_add(item.quantity);
            Ok::<_, AppError>(())
        });
    }
}

async fn new_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<NewOrderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_validated_json(body)?;
    let items = reserve_stock(&state, &req.items)?;
    let totals = order_totals(&items);

    let order = OrderRecord {
        id: Uuid::new_v4(),
        user_id: user.id,
        items,
        shipping_info: req.shipping_info,
        payment_method: req.payment_method,
        payment_status: PaymentStatus::Pending,
        items_price_cents: totals.items_price_cents,
        tax_cents: totals.tax_cents,
        shipping_cents: totals.shipping_cents,
        total_cents: totals.total_cents,
        order_status: INITIAL_ORDER_STATUS.to_string(),
        paid_at: None,
        created_at: Utc::now(),
    };
    state.orders.insert(order.id, order.clone());
    tracing::info!(order_id = %order.id, user_id = %user.id, total_cents = order.total_cents, "order placed");
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<OrderRecord>, AppError> {
    let id = extract_path(id)?;
    let order = state
        .orders
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("order {id}")))?;
    if order.user_id != user.id && user.role != Role::Admin {
        return Err(AppError::Forbidden("order belongs to another account".into()));
    }
    Ok(Json(order))
}

async fn my_orders(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<Vec<OrderRecord>> {
    let mut orders: Vec<OrderRecord> = state
        .orders
        .list()
        .into_iter()
        .filter(|o| o.user_id == user.id)
        .collect();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Json(orders)
}

async fn all_orders(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Json<AllOrdersResponse> {
    let mut orders = state.orders.list();
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let total_amount_cents = orders
        .iter()
        .map(|o| o.total_cents)
        .fold(0, u64::saturating_add);
    Json(AllOrdersResponse {
        total_amount_cents,
        orders,
    })
}
