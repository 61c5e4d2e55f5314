//! Error types for the scaling coordinator.

use orca_state::StateError;
use orca_tasks::TaskError;
use thiserror::Error;

pub type ScaleResult<T> = Result<T, ScaleError>;

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("node {node:?} not found in deployment {deployment_id:?}")]
    NodeNotFound { deployment_id: String, node: String },

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl ScaleError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ScaleError::Task(e) if e.is_conflict())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ScaleError::Task(e) => e.is_retryable(),
            ScaleError::State(e) => e.is_retryable(),
            _ => false,
        }
    }
}
