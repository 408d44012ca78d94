//! Unified error type.

/// The error type returned by cloudlog's fallible operations.
///
/// Logging itself is best-effort: [`Logger`](crate::Logger) reports a failed
/// emission through `tracing` and moves on, and a failed project lookup only
/// downgrades the trace prefix to a placeholder. These errors surface from the
/// lower-level [`Sink`](crate::Sink) and
/// [`ProjectResolver`](crate::gcp::ProjectResolver) APIs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credentials: {0}")]
    Credentials(String),

    #[error("metadata server: {0}")]
    Metadata(String),

    #[error("no project id found in the environment")]
    NoProject,
}
