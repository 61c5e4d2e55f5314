//! The executor contract and the task-scoped context it runs in.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use orca_core::Configuration;
use orca_state::{StateStore, keys};
use orca_tasks::{Task, TaskStatus};

use crate::error::ExecResult;
use crate::operation::Operation;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything an executor needs to run one operation of one task.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub store: StateStore,
    pub config: Arc<Configuration>,
    pub task_id: String,
    pub deployment_id: String,
    pub node_name: String,
}

impl ExecContext {
    /// Current status of the owning task, `None` if the task is unknown.
    pub fn task_status(&self) -> ExecResult<Option<TaskStatus>> {
        let task: Option<Task> = self.store.get_json(&keys::task(&self.task_id))?;
        Ok(task.map(|t| t.status))
    }

    pub fn is_canceled(&self) -> ExecResult<bool> {
        Ok(self.task_status()? == Some(TaskStatus::Canceled))
    }
}

/// Performs provisioning operations on one kind of infrastructure.
pub trait OperationExecutor: Send + Sync {
    fn exec_operation<'a>(
        &'a self,
        ctx: &'a ExecContext,
        operation: &'a Operation,
    ) -> BoxFuture<'a, ExecResult<()>>;
}
