//! Error types for mlm-trainer
//!
//! `TrainerError` is `Clone`: one training round can be awaited by many
//! callers at once and each of them must observe the same outcome.

use std::sync::Arc;
use thiserror::Error;

/// Orchestrator error type
#[derive(Debug, Clone, Error)]
pub enum TrainerError {
    /// Cooperative cancellation (caller request, or the round died of it)
    #[error("Operation cancelled")]
    Cancelled,

    /// Failure raised by a trainer or evaluation call
    #[error("Training failed: {0}")]
    Training(Arc<anyhow::Error>),

    /// Operation not supported by this orchestrator's capabilities
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Rows or datasets whose columns do not line up
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Data or model storage failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal failure (e.g. a background task panicked)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrainerError {
    /// Wrap any error raised by a trainer or evaluator
    pub fn training(err: impl Into<anyhow::Error>) -> Self {
        TrainerError::Training(Arc::new(err.into()))
    }

    /// True for plain cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TrainerError::Cancelled)
    }

    /// Access the original training error by type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            TrainerError::Training(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<mlm_common::Error> for TrainerError {
    fn from(err: mlm_common::Error) -> Self {
        TrainerError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for TrainerError {
    fn from(err: std::io::Error) -> Self {
        TrainerError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for TrainerError {
    fn from(err: serde_json::Error) -> Self {
        TrainerError::Persistence(format!("JSON: {}", err))
    }
}

/// Result type for orchestrator operations
pub type TrainerResult<T> = Result<T, TrainerError>;
