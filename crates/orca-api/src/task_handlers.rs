//! Task resource handlers: listing, inspection, cancellation, and the
//! callbacks the workflow engine uses to report progress.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::info;

use orca_exec::Operation;
use orca_tasks::{Task, TaskStatus};
use orca_workflow::Activity;

use crate::ApiState;
use crate::error::ApiError;

/// Public representation of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    pub id: String,
    pub target_id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub task_type: String,
    /// Creation time, epoch seconds.
    pub created_at: u64,
}

impl From<&Task> for TaskView {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            target_id: task.target_id.clone(),
            status: task.status.to_string(),
            task_type: task.task_type.to_string(),
            created_at: task.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskList {
    pub tasks: Vec<TaskView>,
}

/// Load a task, hiding tasks of other deployments.
fn deployment_task(state: &ApiState, deployment_id: &str, task_id: &str) -> Result<Task, ApiError> {
    let task = state.tasks.get(task_id)?;
    if task.target_id != deployment_id {
        return Err(ApiError::not_found(format!("task {task_id:?} not found")));
    }
    Ok(task)
}

/// GET /deployments/{id}/tasks
pub async fn list_tasks(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<TaskList>, ApiError> {
    let tasks = state.tasks.list_for_deployment(&id)?;
    Ok(Json(TaskList {
        tasks: tasks.iter().map(TaskView::from).collect(),
    }))
}

/// GET /deployments/{id}/tasks/{task}
pub async fn get_task(
    State(state): State<ApiState>,
    Path((id, task_id)): Path<(String, String)>,
) -> Result<Json<TaskView>, ApiError> {
    let task = deployment_task(&state, &id, &task_id)?;
    Ok(Json(TaskView::from(&task)))
}

/// DELETE /deployments/{id}/tasks/{task}
pub async fn cancel_task(
    State(state): State<ApiState>,
    Path((id, task_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    deployment_task(&state, &id, &task_id)?;
    state.tasks.cancel(&task_id)?;
    Ok(StatusCode::ACCEPTED.into_response())
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// PUT /deployments/{id}/tasks/{task}/status
pub async fn update_task_status(
    State(state): State<ApiState>,
    Path((id, task_id)): Path<(String, String)>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<TaskView>, ApiError> {
    deployment_task(&state, &id, &task_id)?;
    let next: TaskStatus = update.status.parse()?;
    let task = match next {
        TaskStatus::Done => state.runner.finish(&task_id)?,
        _ => state.tasks.set_status(&task_id, next)?,
    };
    info!(deployment = %id, task = %task_id, status = %task.status, "task status reported");
    Ok(Json(TaskView::from(&task)))
}

/// A finished workflow activity.
#[derive(Debug, Deserialize)]
pub struct ActivityReport {
    pub node: String,
    pub activity: Activity,
    /// Overrides the operation derived from the activity.
    #[serde(default)]
    pub operation: Option<Operation>,
}

#[derive(Debug, Serialize)]
pub struct ActivityResult {
    pub skipped: bool,
    pub executed: bool,
    pub hooks_invoked: usize,
    pub hooks_failed: Vec<String>,
}

/// POST /deployments/{id}/tasks/{task}/activities
pub async fn report_activity(
    State(state): State<ApiState>,
    Path((id, task_id)): Path<(String, String)>,
    Json(report): Json<ActivityReport>,
) -> Result<Json<ActivityResult>, ApiError> {
    let outcome = state
        .runner
        .run_activity(&task_id, &id, &report.node, &report.activity, report.operation)
        .await?;
    Ok(Json(ActivityResult {
        skipped: outcome.skipped,
        executed: outcome.executed,
        hooks_invoked: outcome.hooks.invoked,
        hooks_failed: outcome.hooks.failed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use orca_core::Configuration;
    use orca_exec::ExecutorRegistry;
    use orca_state::{COMPUTE_TYPE, InstanceBounds, NodeTemplate, StateStore};
    use orca_tasks::{TaskData, TaskRegistry, TaskType};
    use orca_workflow::{ComputeEndpointHook, HookRegistry};

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_node(
                "dep",
                &NodeTemplate {
                    name: "Compute".to_string(),
                    node_type: COMPUTE_TYPE.to_string(),
                    derived_from: vec![],
                    capabilities: vec![],
                    requirements: vec![],
                    instances: InstanceBounds {
                        min: 1,
                        max: 1,
                        default: 1,
                    },
                    infrastructure: None,
                    properties: BTreeMap::new(),
                },
            )
            .unwrap();
        store.create_instances("dep", "Compute", 1).unwrap();
        store
            .set_instance_attribute("dep", "Compute", 0, "private_address", "172.16.0.5")
            .unwrap();

        let hooks = HookRegistry::builder()
            .register(ComputeEndpointHook::new())
            .build();
        ApiState::new(
            TaskRegistry::new(store),
            Arc::new(ExecutorRegistry::new()),
            Arc::new(hooks),
            Arc::new(Configuration::default()),
        )
    }

    async fn new_task(state: &ApiState) -> String {
        state
            .tasks
            .register_task("dep", TaskType::Workflow, TaskData::from([(
                "workflowName".to_string(),
                "install".to_string(),
            )]))
            .await
            .unwrap()
    }

    fn path(task_id: &str) -> Path<(String, String)> {
        Path(("dep".to_string(), task_id.to_string()))
    }

    #[tokio::test]
    async fn get_and_list() {
        let state = test_state();
        let task_id = new_task(&state).await;

        let Json(view) = get_task(State(state.clone()), path(&task_id)).await.unwrap();
        assert_eq!(view.id, task_id);
        assert_eq!(view.target_id, "dep");
        assert_eq!(view.status, "CREATED");
        assert_eq!(view.task_type, "Workflow");
        assert_eq!(view.created_at, state.tasks.get(&task_id).unwrap().created_at);
        assert!(view.created_at > 0);

        let Json(list) = list_tasks(State(state), Path("dep".to_string())).await.unwrap();
        assert_eq!(list.tasks, vec![view]);
    }

    #[tokio::test]
    async fn unknown_or_foreign_task_is_not_found() {
        let state = test_state();
        let err = get_task(State(state.clone()), path("nope")).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let task_id = new_task(&state).await;
        let err = get_task(
            State(state),
            Path(("other".to_string(), task_id)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_then_cancel_again() {
        let state = test_state();
        let task_id = new_task(&state).await;

        let resp = cancel_task(State(state.clone()), path(&task_id)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(state.tasks.status(&task_id).unwrap(), TaskStatus::Canceled);

        let err = cancel_task(State(state), path(&task_id)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn status_reports_drive_the_state_machine() {
        let state = test_state();
        let task_id = new_task(&state).await;

        let update = |status: &str| {
            Json(StatusUpdate {
                status: status.to_string(),
            })
        };
        let Json(view) = update_task_status(State(state.clone()), path(&task_id), update("running"))
            .await
            .unwrap();
        assert_eq!(view.status, "RUNNING");

        let err = update_task_status(State(state.clone()), path(&task_id), update("paused"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let Json(view) = update_task_status(State(state.clone()), path(&task_id), update("DONE"))
            .await
            .unwrap();
        assert_eq!(view.status, "DONE");

        let err = update_task_status(State(state), path(&task_id), update("RUNNING"))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn reported_activity_runs_hooks() {
        let state = test_state();
        let task_id = new_task(&state).await;

        // SetState activities execute nothing, so no executor is needed.
        let Json(result) = report_activity(
            State(state.clone()),
            path(&task_id),
            Json(ActivityReport {
                node: "Compute".to_string(),
                activity: Activity::set_state("configured"),
                operation: None,
            }),
        )
        .await
        .unwrap();
        assert!(!result.executed);
        assert_eq!(result.hooks_invoked, 0);

        let err = report_activity(
            State(state.clone()),
            path(&task_id),
            Json(ActivityReport {
                node: "Compute".to_string(),
                activity: Activity::delegate("install"),
                operation: None,
            }),
        )
        .await
        .unwrap_err();
        // The node has no infrastructure to dispatch to.
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(state.tasks.status(&task_id).unwrap(), TaskStatus::Failed);
        assert_eq!(
            state
                .tasks
                .store()
                .instance_capability_attribute("dep", "Compute", 0, "endpoint", "ip_address")
                .unwrap(),
            None
        );
    }
}
