//! orca-workflow: what happens around a workflow activity.
//!
//! The workflow engine reports each finished activity to the
//! [`ActivityRunner`], which
//!
//! 1. skips the activity when its task was canceled,
//! 2. moves the task to `RUNNING`,
//! 3. dispatches delegate / call-operation activities to the executor of the
//!    node's infrastructure (marking the task `FAILED` on error),
//! 4. runs the post-activity hooks of the [`HookRegistry`].
//!
//! Hooks are registered once at startup through [`HookRegistry::builder`]
//! and are best-effort: a failing or panicking hook is logged and never
//! affects the other hooks or the task.

pub mod activity;
pub mod endpoint;
pub mod error;
pub mod hooks;
pub mod runner;

pub use activity::{Activity, ActivityType};
pub use endpoint::ComputeEndpointHook;
pub use error::{WorkflowError, WorkflowResult};
pub use hooks::{ActivityHook, FnHook, HookContext, HookRegistry, HookRegistryBuilder, HookReport};
pub use runner::{ActivityOutcome, ActivityRunner};
