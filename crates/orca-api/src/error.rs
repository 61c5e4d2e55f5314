//! Mapping of domain errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use orca_exec::ExecError;
use orca_scaling::ScaleError;
use orca_state::StateError;
use orca_tasks::TaskError;
use orca_workflow::WorkflowError;

use crate::handlers::error_response;

/// Error returned by a handler, rendered as the `{ success: false, error }`
/// envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, error = %self.message, "request failed");
        }
        error_response(&self.message, self.status).into_response()
    }
}

fn state_status(e: &StateError) -> StatusCode {
    match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn task_status(e: &TaskError) -> StatusCode {
    match e {
        TaskError::Conflict { .. } | TaskError::Validation(_) => StatusCode::BAD_REQUEST,
        TaskError::IllegalTransition { .. } => StatusCode::CONFLICT,
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::State(e) => state_status(e),
    }
}

fn exec_status(e: &ExecError) -> StatusCode {
    match e {
        ExecError::UnknownInfrastructure(_) => StatusCode::BAD_REQUEST,
        ExecError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ExecError::Transport { .. } | ExecError::Rejected { .. } => StatusCode::BAD_GATEWAY,
        ExecError::State(e) => state_status(e),
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        Self::new(state_status(&e), e.to_string())
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        Self::new(task_status(&e), e.to_string())
    }
}

impl From<ScaleError> for ApiError {
    fn from(e: ScaleError) -> Self {
        let status = match &e {
            ScaleError::Validation(_) => StatusCode::BAD_REQUEST,
            ScaleError::NodeNotFound { .. } => StatusCode::NOT_FOUND,
            ScaleError::Task(e) => task_status(e),
            ScaleError::State(e) => state_status(e),
        };
        Self::new(status, e.to_string())
    }
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        let status = match &e {
            WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
            WorkflowError::Task(e) => task_status(e),
            WorkflowError::Exec(e) => exec_status(e),
            WorkflowError::State(e) => state_status(e),
        };
        Self::new(status, e.to_string())
    }
}
