//! orca-tasks: lifecycle tasks and the per-deployment task registry.
//!
//! A task is one asynchronous lifecycle operation (deploy, scale, custom
//! command...) against one deployment. Its status moves through
//!
//! ```text
//! CREATED ──► RUNNING ──► DONE
//!    │           ├──────► FAILED
//!    │           └──────► CANCELED
//!    └──────────────────► FAILED | CANCELED
//! ```
//!
//! and never leaves a terminal status. The [`TaskRegistry`] guarantees that
//! at most one live task of a conflicting type exists per deployment by
//! registering under the deployment lock held in the shared store.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{TaskError, TaskResult};
pub use registry::TaskRegistry;
pub use types::{Task, TaskData, TaskStatus, TaskType, validate_data};
