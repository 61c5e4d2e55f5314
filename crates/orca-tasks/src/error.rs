//! Error types for the task registry.

use orca_state::StateError;
use thiserror::Error;

use crate::types::{TaskStatus, TaskType};

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
    /// Another live task of a conflicting type exists on the deployment.
    #[error(
        "conflict: task {task_id:?} of type {task_type} is already running on deployment {deployment_id:?}"
    )]
    Conflict {
        deployment_id: String,
        task_id: String,
        task_type: TaskType,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("illegal task status transition from {from} to {to}")]
    IllegalTransition { from: TaskStatus, to: TaskStatus },

    #[error("task {0:?} not found")]
    NotFound(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl TaskError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TaskError::Conflict { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::State(e) if e.is_retryable())
    }
}
