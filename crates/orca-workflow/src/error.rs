//! Error types for the activity runner.

use orca_exec::ExecError;
use orca_state::StateError;
use orca_tasks::TaskError;
use thiserror::Error;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    State(#[from] StateError),
}
