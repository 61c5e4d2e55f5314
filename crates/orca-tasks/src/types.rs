//! Task model: types, statuses and per-type data schema.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};

/// Operation parameters carried by a task, kept as strings for wire
/// compatibility and checked against [`TaskType::required_data_keys`].
pub type TaskData = BTreeMap<String, String>;

/// Kind of lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    Deploy,
    Undeploy,
    ScaleUp,
    ScaleDown,
    CustomCommand,
    Workflow,
    Purge,
}

impl TaskType {
    pub const ALL: [TaskType; 7] = [
        TaskType::Deploy,
        TaskType::Undeploy,
        TaskType::ScaleUp,
        TaskType::ScaleDown,
        TaskType::CustomCommand,
        TaskType::Workflow,
        TaskType::Purge,
    ];

    /// Types that reshape the deployment and exclude one another.
    fn is_exclusive(self) -> bool {
        matches!(
            self,
            TaskType::Deploy
                | TaskType::Undeploy
                | TaskType::ScaleUp
                | TaskType::ScaleDown
                | TaskType::Purge
        )
    }

    /// Types that create or tear down the whole deployment.
    fn is_whole_deployment(self) -> bool {
        matches!(self, TaskType::Deploy | TaskType::Undeploy | TaskType::Purge)
    }

    /// Whether a live task of type `other` forbids registering `self` on the
    /// same deployment. The relation is symmetric.
    pub fn conflicts_with(self, other: TaskType) -> bool {
        (self.is_exclusive() && other.is_exclusive())
            || self.is_whole_deployment()
            || other.is_whole_deployment()
    }

    /// Data keys a task of this type must carry.
    pub fn required_data_keys(self) -> &'static [&'static str] {
        match self {
            TaskType::ScaleUp | TaskType::ScaleDown => {
                &["node", "new_instances_ids", "current_instances_number", "req"]
            }
            TaskType::CustomCommand => &["node", "commandName"],
            TaskType::Workflow => &["workflowName"],
            TaskType::Deploy | TaskType::Undeploy | TaskType::Purge => &[],
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskType::Deploy => "Deploy",
            TaskType::Undeploy => "Undeploy",
            TaskType::ScaleUp => "ScaleUp",
            TaskType::ScaleDown => "ScaleDown",
            TaskType::CustomCommand => "CustomCommand",
            TaskType::Workflow => "Workflow",
            TaskType::Purge => "Purge",
        };
        f.write_str(name)
    }
}

impl FromStr for TaskType {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| TaskError::Validation(format!("unknown task type {s:?}")))
    }
}

/// Task status. `DONE`, `FAILED` and `CANCELED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Created,
    Running,
    Done,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed | TaskStatus::Canceled)
    }

    /// Whether a task in `self` may be moved to `next`.
    ///
    /// Rewriting the current status of a live task is allowed and has no
    /// effect.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Created, Created) | (Running, Running) => true,
            (Created, Running | Failed | Canceled) => true,
            (Running, Done | Failed | Canceled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(TaskStatus::Created),
            "RUNNING" => Ok(TaskStatus::Running),
            "DONE" => Ok(TaskStatus::Done),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELED" => Ok(TaskStatus::Canceled),
            _ => Err(TaskError::Validation(format!("unknown task status {s:?}"))),
        }
    }
}

/// A persisted lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Deployment the task operates on.
    pub target_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    #[serde(default)]
    pub data: TaskData,
    /// Unix timestamp (seconds).
    pub created_at: u64,
}

impl Task {
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn data_value(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// Check `data` against the schema of `task_type`.
pub fn validate_data(task_type: TaskType, data: &TaskData) -> TaskResult<()> {
    for key in task_type.required_data_keys() {
        if !data.contains_key(*key) {
            return Err(TaskError::Validation(format!(
                "{task_type} task is missing data key {key:?}"
            )));
        }
    }
    if let Some(value) = data.get("current_instances_number") {
        value.parse::<u32>().map_err(|_| {
            TaskError::Validation(format!(
                "current_instances_number must be a non-negative integer, got {value:?}"
            ))
        })?;
    }
    Ok(())
}
