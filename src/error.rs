//! Crate-wide error taxonomy.
//!
//! Mirrors the abstract kinds described for the tick pipeline: a transient
//! backend hiccup is recoverable and logged, a configuration problem is
//! fatal at construction, and "not found" / "validation" exist so the
//! (out-of-scope) read-API layer has a seam to map onto HTTP status codes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),
}

pub type AppResult<T> = Result<T, AppError>;
