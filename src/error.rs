//! Engine-wide error taxonomy
//!
//! Every component-local error enum (store, scheduler, subprocess, agent
//! invocation) converts into exactly one [`EngineError`] variant via an
//! explicit `From` impl, never a blanket catch-all, so a caller at the API
//! boundary can always map an error to the right HTTP status without
//! knowing which component raised it.

use thiserror::Error;

use crate::store::StoreError;

/// Closed error taxonomy for the orchestration core.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl EngineError {
    /// HTTP status an `api` layer should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::NotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::Invalid(_) => 400,
            EngineError::Transient(_) => 503,
            EngineError::Fatal(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::RetryExhausted(msg) => EngineError::Transient(msg),
            StoreError::Migration(msg) => EngineError::Fatal(msg),
            StoreError::Sqlite(e) => EngineError::Fatal(e.to_string()),
            StoreError::Serde(e) => EngineError::Invalid(e.to_string()),
        }
    }
}
