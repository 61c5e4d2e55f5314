//! Error types for executor dispatch.

use orca_core::ConfigError;
use orca_state::StateError;
use thiserror::Error;

pub type ExecResult<T> = Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("no executor registered for infrastructure {0:?}")]
    UnknownInfrastructure(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The cluster could not be reached or the exchange broke off.
    #[error("cluster request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    /// The cluster answered with a non-success status.
    #[error("cluster rejected operation {operation:?} with status {status}: {body}")]
    Rejected {
        operation: String,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    State(#[from] StateError),
}
