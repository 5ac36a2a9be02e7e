//! Shared error type used across the scheduling engine's crates.

/// Cross-cutting error type. Individual crates also expose narrower local
/// error enums (e.g. store conflicts, trigger parse errors) where the
/// caller needs to match on a specific variant; this type is for
/// boundaries that only need to report and propagate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
