//! # Payment API
//!
//! - `POST /payment/checkout_session` — open a checkout for a card order
//! - `POST /payment/webhook`          — payment-gateway callback
//!
//! The gateway signs each callback with HMAC-SHA256 over the exact request
//! bytes and sends `X-Signature: sha256=<hex>`. Verification runs over the
//! [`RawBody`] retained by the body parser, never over the re-encoded,
//! sanitised document.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::error::AppError;
use crate::extractors::{extract_json, CurrentUser};
use crate::middleware::body::RawBody;
use crate::state::{
    AppState, CheckoutRecord, CheckoutStatus, PaymentMethod, PaymentStatus,
};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the callback signature.
pub const SIGNATURE_HEADER: &str = "x-signature";
const SIGNATURE_PREFIX: &str = "sha256=";

/// Event type that settles a checkout.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payment/checkout_session", post(checkout_session))
        .route("/payment/webhook", post(webhook))
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub checkout_id: Uuid,
    pub order_id: Uuid,
    pub amount_cents: u64,
    pub status: CheckoutStatus,
}

impl From<&CheckoutRecord> for CheckoutResponse {
    fn from(checkout: &CheckoutRecord) -> Self {
        Self {
            checkout_id: checkout.id,
            order_id: checkout.order_id,
            amount_cents: checkout.amount_cents,
            status: checkout.status,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutCompleted {
    checkout_id: Uuid,
}

// -- Signatures ---------------------------------------------------------------

/// Hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("webhook key rejected: {e}")))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a `sha256=<hex>` signature header value against `payload`.
pub fn verify_signature(secret: &str, payload: &[u8], header_value: &str) -> Result<bool, AppError> {
    let Some(provided_hex) = header_value.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return Ok(false);
    };
    let Ok(provided) = hex::decode(provided_hex) else {
        return Ok(false);
    };
    let expected = hex::decode(sign_payload(secret, payload)?)
        .map_err(|e| AppError::Internal(format!("re-decoding own signature: {e}")))?;
    if provided.len() != expected.len() {
        return Ok(false);
    }
    Ok(provided.ct_eq(&expected).into())
}

// -- Handlers -----------------------------------------------------------------

async fn checkout_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_json(body)?;
    let order = state
        .orders
        .get(&req.order_id)
        .ok_or_else(|| AppError::NotFound(format!("order {}", req.order_id)))?;

    if order.user_id != user.id {
        return Err(AppError::Forbidden("order belongs to another account".into()));
    }
    if order.payment_method != PaymentMethod::Card {
        return Err(AppError::Validation(
            "only card orders can be paid online".into(),
        ));
    }
    if order.payment_status == PaymentStatus::Paid {
        return Err(AppError::Conflict(format!("order {} is already paid", order.id)));
    }

    let checkout = CheckoutRecord {
        id: Uuid::new_v4(),
        order_id: order.id,
        user_id: user.id,
        amount_cents: order.total_cents,
        status: CheckoutStatus::Open,
        created_at: Utc::now(),
    };
    state.checkouts.insert(checkout.id, checkout.clone());
    tracing::info!(checkout_id = %checkout.id, order_id = %order.id, "checkout session opened");
    Ok((StatusCode::CREATED, Json(CheckoutResponse::from(&checkout))))
}

fn settle_checkout(state: &AppState, checkout_id: Uuid) -> Result<(), AppError> {
    let order_id = state
        .checkouts
        .try_update(&checkout_id, |checkout| {
            let first = checkout.status == CheckoutStatus::Open;
            checkout.status = CheckoutStatus::Completed;
            Ok::<_, AppError>(first.then_some(checkout.order_id))
        })
        .ok_or_else(|| AppError::NotFound(format!("checkout {checkout_id}")))??;

    // Already settled by an earlier delivery of the same event.
    let Some(order_id) = order_id else {
        return Ok(());
    };

    state
        .orders
        .try_update(&order_id, |order| {
            order.payment_status = PaymentStatus::Paid;
            order.paid_at = Some(Utc::now());
            Ok::<_, AppError>(())
        })
        .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))??;
    tracing::info!(%checkout_id, %order_id, "order paid");
    Ok(())
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    RawBody(raw): RawBody,
) -> Result<Json<serde_json::Value>, AppError> {
    let secret = state.config.webhook_secret.as_deref().ok_or_else(|| {
        AppError::ServiceUnavailable("payment webhook secret is not configured".into())
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing webhook signature".into()))?;
    if !verify_signature(secret, &raw, signature)? {
        return Err(AppError::Unauthorized("invalid webhook signature".into()));
    }

    let event: WebhookEvent = serde_json::from_slice(&raw)
        .map_err(|e| AppError::BadRequest(format!("malformed webhook event: {e}")))?;

    if event.kind == CHECKOUT_COMPLETED {
        let data: CheckoutCompleted = serde_json::from_value(event.data)
            .map_err(|e| AppError::BadRequest(format!("malformed checkout event: {e}")))?;
        settle_checkout(&state, data.checkout_id)?;
    } else {
        tracing::debug!(kind = %event.kind, "ignoring webhook event");
    }

    Ok(Json(serde_json::json!({ "received": true })))
}
