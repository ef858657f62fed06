//! Structured error taxonomy.
//!
//! Every failure mode in the pipeline is one of six kinds (see
//! `DESIGN.md` for the full propagation contract). CLI code composes these
//! under `anyhow::Error` via `?`; the HTTP server maps each variant to a
//! status code and machine-readable code the way `server.rs` already does
//! for its own `AppError`.

use axum::http::StatusCode;
use thiserror::Error;

/// The crate-wide error type.
#[derive(Debug, Error)]
pub enum PkaError {
    /// RPC timeout, connection refused, or HTTP ≥ 400 from a model daemon.
    /// Not retried inside a request; surfaced as a 5xx.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed model response: bad embedding payload shape, dimension
    /// mismatch, count mismatch, or non-JSON chat response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Chat response parsed as JSON but failed schema validation, or
    /// retries were exhausted.
    #[error("validation error: {0}")]
    Validation(String),

    /// Chunker, embedding mismatch, or transaction failure for one file
    /// during ingestion. The file is skipped; other files continue.
    #[error("ingestion error: {0}")]
    Ingestion(String),

    /// Replay or lookup for an id that doesn't exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or invalid settings at startup. Fatal.
    #[error("config error: {0}")]
    Config(String),
}

impl PkaError {
    /// Machine-readable code used in HTTP error bodies and log lines.
    pub fn code(&self) -> &'static str {
        match self {
            PkaError::Transport(_) => "transport_error",
            PkaError::Protocol(_) => "protocol_error",
            PkaError::Validation(_) => "validation_error",
            PkaError::Ingestion(_) => "ingestion_error",
            PkaError::NotFound(_) => "not_found",
            PkaError::Config(_) => "config_error",
        }
    }

    /// HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            PkaError::Transport(_) | PkaError::Protocol(_) => StatusCode::BAD_GATEWAY,
            PkaError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PkaError::Ingestion(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PkaError::NotFound(_) => StatusCode::NOT_FOUND,
            PkaError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
