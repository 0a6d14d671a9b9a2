//! # Process-Level Failure Handling
//!
//! A panic is an uncaught synchronous error. Where it happens decides what
//! it means:
//!
//! - Inside a request (under [`request_scope_middleware`]) the panic is
//!   caught by the `CatchPanicLayer` and becomes a 500 through
//!   [`panic_response`]. The process keeps serving.
//! - Anywhere else (startup, background tasks, the runtime itself) the hook
//!   installed by [`install_panic_hook`] logs it and exits with status 1
//!   immediately, without cleanup. An external process manager restarts us.
//!
//! Failures of supervised asynchronous tasks take the graceful route
//! instead; see [`crate::server`].

use std::any::Any;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

tokio::task_local! {
    static REQUEST_SCOPE: ();
}

/// Whether the current task is handling a request.
pub fn in_request_scope() -> bool {
    REQUEST_SCOPE.try_with(|_| ()).is_ok()
}

/// Run `fut` marked as request handling.
pub async fn request_scope<F: std::future::Future>(fut: F) -> F::Output {
    REQUEST_SCOPE.scope((), fut).await
}

/// Mark everything downstream as request handling.
pub async fn request_scope_middleware(request: Request, next: Next) -> Response {
    request_scope(next.run(request)).await
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Convert a caught handler panic into the uniform error response.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    AppError::Internal(format!("handler panicked: {}", payload_message(payload.as_ref())))
        .into_response()
}

/// Install the fail-fast panic hook. Call once, after tracing is set up.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let message = payload_message(info.payload());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();

        if in_request_scope() {
            tracing::error!(panic = %message, %location, "request handler panicked");
            return;
        }

        tracing::error!(panic = %message, %location, "uncaught panic");
        tracing::error!("shutting down due to uncaught panic");
        std::process::exit(1);
    }));
}
