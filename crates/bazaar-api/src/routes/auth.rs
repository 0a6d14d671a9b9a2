//! # Account & Session API
//!
//! - `POST /register` — create an account and log it in
//! - `POST /login`    — exchange credentials for a session cookie
//! - `GET  /logout`   — end the session and expire the cookie
//! - `GET  /me`       — the logged-in account
//!
//! Sessions are opaque random tokens held server-side; the browser carries
//! them in an http-only `token` cookie. Passwords are stored as Argon2id
//! PHC strings and hashed on the blocking pool.

use std::convert::Infallible;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{AppendHeaders, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, CurrentUser, Validate, SESSION_COOKIE};
use crate::state::{AppState, Role, SessionRecord, Store, UserRecord, UserView};

/// Session lifetime, also the cookie's `Max-Age`.
pub const SESSION_TTL_DAYS: i64 = 7;

/// How often expired sessions are swept from memory.
pub const SESSION_PURGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

const MAX_USER_NAME_CHARS: usize = 50;
const MIN_PASSWORD_CHARS: usize = 6;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/me", get(me))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl Validate for RegisterRequest {
    fn validate(&self) -> Result<(), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("Please enter your name".into());
        }
        if name.chars().count() > MAX_USER_NAME_CHARS {
            return Err(format!(
                "Your name cannot exceed {MAX_USER_NAME_CHARS} characters"
            ));
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => return Err("Please enter valid email address".into()),
        }
        if self.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(format!(
                "Your password must be at least {MIN_PASSWORD_CHARS} characters"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: Uuid,
    pub user: UserView,
}

// -- Passwords ----------------------------------------------------------------

/// Hash `password` into an Argon2id PHC string.
pub async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
    })
    .await
    .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
}

/// Check `password` against a stored PHC string. Unparseable hashes never match.
pub async fn verify_password(password: String, phc: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&phc) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|e| AppError::Internal(format!("password verification task failed: {e}")))
}

// -- Cookies ------------------------------------------------------------------

fn cookie_header(value: &str, max_age_secs: i64, secure: bool) -> Result<HeaderValue, AppError> {
    let mut cookie =
        format!("{SESSION_COOKIE}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(format!("building session cookie: {e}")))
}

/// `Set-Cookie` value carrying a fresh session token.
pub fn session_cookie(token: Uuid, secure: bool) -> Result<HeaderValue, AppError> {
    cookie_header(
        &token.to_string(),
        Duration::days(SESSION_TTL_DAYS).num_seconds(),
        secure,
    )
}

/// `Set-Cookie` value that makes the browser drop the session cookie.
pub fn expired_cookie(secure: bool) -> Result<HeaderValue, AppError> {
    cookie_header("", 0, secure)
}

fn open_session(
    state: &AppState,
    user: &UserRecord,
    status: StatusCode,
) -> Result<impl IntoResponse, AppError> {
    let token = Uuid::new_v4();
    state.sessions.insert(
        token,
        SessionRecord {
            token,
            user_id: user.id,
            expires_at: Utc::now() + Duration::days(SESSION_TTL_DAYS),
        },
    );
    let cookie = session_cookie(token, state.config.mode.is_production())?;
    Ok((
        status,
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(AuthResponse {
            token,
            user: UserView::from(user),
        }),
    ))
}

/// Drop sessions that expired at or before `now`. Returns how many were dropped.
pub fn purge_expired_sessions(sessions: &Store<SessionRecord>, now: DateTime<Utc>) -> usize {
    sessions.retain(|s| s.expires_at > now)
}

/// Periodically purge expired sessions. Runs until the task is dropped.
pub async fn run_session_purge(
    sessions: Store<SessionRecord>,
    every: std::time::Duration,
) -> Result<(), Infallible> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let purged = purge_expired_sessions(&sessions, Utc::now());
        if purged > 0 {
            tracing::debug!(purged, "purged expired sessions");
        }
    }
}

// -- Handlers -----------------------------------------------------------------

async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_validated_json(body)?;
    let email = req.email.trim().to_string();
    if state.user_by_email(&email).is_some() {
        return Err(AppError::Conflict("Duplicate email entered".into()));
    }

    let password_hash = hash_password(req.password).await?;
    let user = UserRecord {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        email,
        password_hash,
        role: Role::User,
        created_at: Utc::now(),
    };

    // The hash ran outside the lock, so the address is checked again under
    // the same write guard as the insert.
    let email = user.email.clone();
    if !state
        .users
        .insert_unless(|u| u.email.eq_ignore_ascii_case(&email), user.id, user.clone())
    {
        return Err(AppError::Conflict("Duplicate email entered".into()));
    }
    tracing::info!(user_id = %user.id, "account registered");

    open_session(&state, &user, StatusCode::CREATED)
}

async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = extract_json(body)?;
    let (email, password) = match (req.email, req.password) {
        (Some(e), Some(p)) if !e.trim().is_empty() && !p.is_empty() => (e, p),
        _ => return Err(AppError::BadRequest("Please enter email & password".into())),
    };

    let invalid = || AppError::Unauthorized("Invalid email or password".into());
    let user = state.user_by_email(email.trim()).ok_or_else(invalid)?;
    if !verify_password(password, user.password_hash.clone()).await? {
        tracing::debug!(user_id = %user.id, "password mismatch");
        return Err(invalid());
    }

    open_session(&state, &user, StatusCode::OK)
}

async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(token) = jar
        .get(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
    {
        state.sessions.remove(&token);
    }
    let cookie = expired_cookie(state.config.mode.is_production())?;
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(serde_json::json!({ "message": "Logged Out" })),
    ))
}

async fn me(CurrentUser(user): CurrentUser) -> Json<UserView> {
    Json(UserView::from(&user))
}
