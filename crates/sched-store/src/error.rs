//! Store-local error type. Narrower than `sched_domain::Error` so callers
//! (the Scheduler, in particular) can match on `DuplicateKey` and
//! `InvalidTransition` without string comparison.

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("idempotency key already exists: {0}")]
    DuplicateKey(String),

    #[error("invalid run status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: String, to: String },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
