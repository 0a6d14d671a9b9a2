//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for request DTOs, helpers to extract and
//! validate JSON bodies in handlers, and the session extractors
//! [`CurrentUser`] and [`AdminUser`].

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequestParts, Path, Query};
use axum::http::request::Parts;
use axum::http::header;
use axum::Json;
use axum_extra::extract::CookieJar;
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, Role, UserRecord};

/// Name of the session cookie set at login.
pub const SESSION_COOKIE: &str = "token";

const LOGIN_REQUIRED: &str = "Login first to access this resource";

/// Trait for request types that can validate their business rules
/// beyond what serde deserialization checks.
pub trait Validate {
    /// Validate business rules. Returns an error message on failure.
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// Extract path parameters, mapping rejections to [`AppError::BadRequest`].
pub fn extract_path<T>(result: Result<Path<T>, PathRejection>) -> Result<T, AppError> {
    result
        .map(|Path(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract query parameters, mapping rejections to [`AppError::BadRequest`].
pub fn extract_query<T>(result: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    result
        .map(|Query(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// The authenticated account behind the request's session token.
///
/// The token is read from the `token` cookie, or from an
/// `Authorization: Bearer` header for non-browser clients. Missing,
/// unknown and expired tokens are all 401.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let raw = jar
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .or_else(|| bearer_token(parts).map(str::to_string))
            .ok_or_else(|| AppError::Unauthorized(LOGIN_REQUIRED.into()))?;

        let token =
            Uuid::parse_str(&raw).map_err(|_| AppError::Unauthorized(LOGIN_REQUIRED.into()))?;
        let session = state
            .sessions
            .get(&token)
            .ok_or_else(|| AppError::Unauthorized(LOGIN_REQUIRED.into()))?;

        if session.expires_at <= Utc::now() {
            state.sessions.remove(&token);
            return Err(AppError::Unauthorized(LOGIN_REQUIRED.into()));
        }

        state
            .users
            .get(&session.user_id)
            .map(CurrentUser)
            .ok_or_else(|| AppError::Unauthorized(LOGIN_REQUIRED.into()))
    }
}

/// A [`CurrentUser`] whose role is `admin`. Other roles get 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub UserRecord);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(AppError::Forbidden(format!(
                "Role ({}) is not allowed to access this resource",
                user.role.as_str()
            )));
        }
        Ok(AdminUser(user))
    }
}
