//! Failure taxonomy for desk operations.
//!
//! Guard and validation failures carry the failed precondition in plain
//! language so the router can show them to the acting user verbatim.
//! [`DeskError::Upstream`] wraps platform or storage failures and is never
//! shown to non-administrative users in full.

#[derive(thiserror::Error, Debug)]
pub enum DeskError {
    #[error("no ticket is tracked for this conversation")]
    NotFound,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Validation(String),
    #[error("a platform or storage call failed: {0}")]
    Upstream(#[from] anyhow::Error),
}

impl DeskError {
    /// Wrap any boundary error as an upstream failure.
    pub fn upstream<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DeskError::Upstream(anyhow::Error::new(err))
    }
}
