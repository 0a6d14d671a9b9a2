//! # Serving & Supervised Shutdown
//!
//! Background tasks run under a [`Supervisor`]. A task that returns `Err`
//! is the asynchronous counterpart of an uncaught exception: it is logged
//! and reported on the [`FailureSignal`], which [`shutdown_trigger`] turns
//! into an ordered shutdown. SIGINT and SIGTERM take the same path.
//!
//! Shutdown order: stop accepting, drain in-flight requests, return the
//! [`ShutdownReason`] to `main`, which closes the pool and picks the exit
//! code.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::process::ExitCode;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// A supervised task that gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: &'static str,
    pub error: String,
}

/// Spawns background tasks and reports their failures.
#[derive(Debug, Clone)]
pub struct Supervisor {
    failures: mpsc::UnboundedSender<TaskFailure>,
}

/// Receiving end of [`Supervisor`] failure reports.
#[derive(Debug)]
pub struct FailureSignal {
    failures: mpsc::UnboundedReceiver<TaskFailure>,
}

/// Create a linked supervisor and failure signal.
pub fn supervisor() -> (Supervisor, FailureSignal) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Supervisor { failures: tx }, FailureSignal { failures: rx })
}

impl Supervisor {
    /// Spawn `task`; an `Err` result is logged and reported.
    pub fn spawn<F, E>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let failures = self.failures.clone();
        tokio::spawn(async move {
            match task.await {
                Ok(()) => tracing::info!(task = name, "background task finished"),
                Err(err) => {
                    tracing::error!(task = name, error = %err, "background task failed");
                    // The receiver is gone only when shutdown is already under way.
                    let _ = failures.send(TaskFailure {
                        task: name,
                        error: err.to_string(),
                    });
                }
            }
        })
    }
}

impl FailureSignal {
    /// Wait for the next failure. Pends forever once every supervisor
    /// handle is dropped.
    pub async fn recv(&mut self) -> TaskFailure {
        match self.failures.recv().await {
            Some(failure) => failure,
            None => std::future::pending().await,
        }
    }
}

/// Why the server stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(&'static str),
    TaskFailed(TaskFailure),
}

impl ShutdownReason {
    /// 0 for an operator-requested stop, 1 after a task failure.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Signal(_) => ExitCode::SUCCESS,
            Self::TaskFailed(_) => ExitCode::FAILURE,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "received {name}"),
            Self::TaskFailed(failure) => {
                write!(f, "task '{}' failed: {}", failure.task, failure.error)
            }
        }
    }
}

async fn terminate_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    }
}

/// Resolve on the first supervised failure or termination signal.
pub async fn shutdown_trigger(mut failures: FailureSignal) -> ShutdownReason {
    tokio::select! {
        failure = failures.recv() => ShutdownReason::TaskFailed(failure),
        name = terminate_signal() => ShutdownReason::Signal(name),
    }
}

/// Serve `app` on `listener` until `trigger` resolves, then drain.
///
/// The router is served with peer-address connect info so the rate limiter
/// can fall back to the socket address.
pub async fn serve<F>(listener: TcpListener, app: Router, trigger: F) -> std::io::Result<ShutdownReason>
where
    F: Future<Output = ShutdownReason> + Send + 'static,
{
    let (reason_tx, reason_rx) = oneshot::channel();
    let shutdown = async move {
        let reason = trigger.await;
        tracing::warn!(%reason, "shutting down, no longer accepting connections");
        let _ = reason_tx.send(reason);
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    tracing::info!("in-flight requests drained");
    reason_rx
        .await
        .map_err(|_| std::io::Error::other("server stopped without a shutdown reason"))
}
