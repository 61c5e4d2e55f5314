//! Deployment lifecycle handlers.
//!
//! Each handler registers a task through the task registry (or the scaling
//! coordinator) and answers `202 Accepted` with the task location.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::info;

use orca_state::DeploymentTopology;
use orca_tasks::{TaskData, TaskResult, TaskType};

use crate::ApiState;
use crate::error::ApiError;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Location of a task resource.
pub fn task_location(deployment_id: &str, task_id: &str) -> String {
    format!("/deployments/{deployment_id}/tasks/{task_id}")
}

/// `202 Accepted` pointing at the task.
pub(crate) fn accepted(deployment_id: &str, task_id: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        [(header::LOCATION, task_location(deployment_id, task_id))],
    )
        .into_response()
}

pub(crate) fn require_deployment(state: &ApiState, deployment_id: &str) -> Result<(), ApiError> {
    if state.tasks.store().deployment_exists(deployment_id)? {
        Ok(())
    } else {
        Err(ApiError::not_found("deployment not found"))
    }
}

// ── Deployments ────────────────────────────────────────────────

/// PUT /deployments/{id}
pub async fn deploy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(topology): Json<DeploymentTopology>,
) -> Result<Response, ApiError> {
    if topology.nodes.is_empty() {
        return Err(ApiError::bad_request(
            "a deployment topology needs at least one node",
        ));
    }

    let (task_id, ()) = state
        .tasks
        .register_task_with(&id, TaskType::Deploy, |store| -> TaskResult<(TaskData, ())> {
            store.store_topology(&id, &topology)?;
            Ok((TaskData::new(), ()))
        })
        .await?;
    info!(deployment = %id, task = %task_id, nodes = topology.nodes.len(), "deployment submitted");
    Ok(accepted(&id, &task_id))
}

#[derive(Debug, Default, Deserialize)]
pub struct UndeployParams {
    #[serde(default)]
    pub purge: bool,
}

/// DELETE /deployments/{id}
pub async fn undeploy(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<UndeployParams>,
) -> Result<Response, ApiError> {
    require_deployment(&state, &id)?;
    let task_type = if params.purge {
        TaskType::Purge
    } else {
        TaskType::Undeploy
    };
    let task_id = state
        .tasks
        .register_task(&id, task_type, TaskData::new())
        .await?;
    Ok(accepted(&id, &task_id))
}

// ── Scaling ────────────────────────────────────────────────────

/// Raw `add` / `remove` query values, validated by [`ScaleParams::delta`].
#[derive(Debug, Default, Deserialize)]
pub struct ScaleParams {
    pub add: Option<String>,
    pub remove: Option<String>,
}

/// Requested scaling direction and amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDelta {
    Add(u32),
    Remove(u32),
}

impl ScaleParams {
    /// `add` takes precedence when both are given.
    pub fn delta(&self) -> Result<ScaleDelta, ApiError> {
        if let Some(add) = &self.add {
            return positive(add, "add").map(ScaleDelta::Add);
        }
        if let Some(remove) = &self.remove {
            return positive(remove, "remove").map(ScaleDelta::Remove);
        }
        Err(ApiError::bad_request(
            "you need to provide an add or remove parameter",
        ))
    }
}

fn positive(value: &str, name: &str) -> Result<u32, ApiError> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ApiError::bad_request(format!(
            "you need to provide a positive non-zero value as {name} parameter"
        ))),
    }
}

/// POST /deployments/{id}/scale/{node}
pub async fn scale(
    State(state): State<ApiState>,
    Path((id, node)): Path<(String, String)>,
    Query(params): Query<ScaleParams>,
) -> Result<Response, ApiError> {
    let delta = params.delta()?;
    require_deployment(&state, &id)?;

    let outcome = match delta {
        ScaleDelta::Add(n) => state.scaling.scale_up(&id, &node, n).await?,
        ScaleDelta::Remove(n) => state.scaling.scale_down(&id, &node, n).await?,
    };
    Ok(accepted(&id, &outcome.task_id))
}

// ── Workflows and custom commands ──────────────────────────────

/// POST /deployments/{id}/workflows/{name}
pub async fn run_workflow(
    State(state): State<ApiState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    require_deployment(&state, &id)?;
    let data = TaskData::from([("workflowName".to_string(), name)]);
    let task_id = state
        .tasks
        .register_task(&id, TaskType::Workflow, data)
        .await?;
    Ok(accepted(&id, &task_id))
}

/// Custom command request body.
#[derive(Debug, Deserialize)]
pub struct CustomCommandRequest {
    pub node: String,
    pub name: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

/// POST /deployments/{id}/custom
pub async fn custom_command(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<CustomCommandRequest>,
) -> Result<Response, ApiError> {
    require_deployment(&state, &id)?;
    if state.tasks.store().get_node(&id, &req.node)?.is_none() {
        return Err(ApiError::not_found(format!("node {:?} not found", req.node)));
    }

    let mut data = TaskData::from([
        ("node".to_string(), req.node),
        ("commandName".to_string(), req.name),
    ]);
    for (key, value) in req.inputs {
        data.insert(format!("inputs/{key}"), value);
    }
    let task_id = state
        .tasks
        .register_task(&id, TaskType::CustomCommand, data)
        .await?;
    Ok(accepted(&id, &task_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use orca_core::Configuration;
    use orca_exec::ExecutorRegistry;
    use orca_state::{
        COMPUTE_TYPE, InstanceBounds, NodeTemplate, Requirement, SCALABLE_CAPABILITY, StateStore,
    };
    use orca_tasks::{TaskRegistry, TaskStatus};
    use orca_workflow::HookRegistry;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        ApiState::new(
            TaskRegistry::new(store),
            Arc::new(ExecutorRegistry::new()),
            Arc::new(HookRegistry::empty()),
            Arc::new(Configuration::default()),
        )
    }

    fn test_topology() -> DeploymentTopology {
        let node = |name: &str, capabilities: Vec<String>, requirements: Vec<Requirement>| {
            NodeTemplate {
                name: name.to_string(),
                node_type: COMPUTE_TYPE.to_string(),
                derived_from: vec![],
                capabilities,
                requirements,
                instances: InstanceBounds {
                    min: 1,
                    max: 3,
                    default: 1,
                },
                infrastructure: None,
                properties: BTreeMap::new(),
            }
        };
        DeploymentTopology {
            nodes: vec![
                node(
                    "Compute",
                    vec![SCALABLE_CAPABILITY.to_string()],
                    vec![Requirement {
                        name: "network".to_string(),
                        node: "Net".to_string(),
                        capability: None,
                    }],
                ),
                node("Net", vec![], vec![]),
            ],
        }
    }

    fn location(resp: &Response) -> String {
        resp.headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string()
    }

    fn task_id(resp: &Response) -> String {
        location(resp).rsplit('/').next().unwrap().to_string()
    }

    /// Deploy the test topology and mark the deploy task done.
    async fn deployed(state: &ApiState) {
        let resp = deploy(
            State(state.clone()),
            Path("dep".to_string()),
            Json(test_topology()),
        )
        .await
        .unwrap();
        state.runner.finish(&task_id(&resp)).unwrap();
    }

    fn scale_params(add: Option<&str>, remove: Option<&str>) -> Query<ScaleParams> {
        Query(ScaleParams {
            add: add.map(str::to_string),
            remove: remove.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn deploy_accepts_and_stores_topology() {
        let state = test_state();
        let resp = deploy(
            State(state.clone()),
            Path("dep".to_string()),
            Json(test_topology()),
        )
        .await
        .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(location(&resp).starts_with("/deployments/dep/tasks/"));
        let task = state.tasks.get(&task_id(&resp)).unwrap();
        assert_eq!(task.task_type, TaskType::Deploy);
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(
            state.tasks.store().node_instance_ids("dep", "Compute").unwrap(),
            vec![0]
        );
    }

    #[tokio::test]
    async fn deploy_rejects_empty_topology() {
        let state = test_state();
        let err = deploy(
            State(state),
            Path("dep".to_string()),
            Json(DeploymentTopology::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn undeploy_unknown_deployment() {
        let state = test_state();
        let err = undeploy(
            State(state),
            Path("nope".to_string()),
            Query(UndeployParams::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn undeploy_with_purge() {
        let state = test_state();
        deployed(&state).await;

        let resp = undeploy(
            State(state.clone()),
            Path("dep".to_string()),
            Query(UndeployParams { purge: true }),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let task = state.tasks.get(&task_id(&resp)).unwrap();
        assert_eq!(task.task_type, TaskType::Purge);
    }

    #[tokio::test]
    async fn scale_up_registers_task() {
        let state = test_state();
        deployed(&state).await;

        let resp = scale(
            State(state.clone()),
            Path(("dep".to_string(), "Compute".to_string())),
            scale_params(Some("5"), None),
        )
        .await
        .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let task = state.tasks.get(&task_id(&resp)).unwrap();
        assert_eq!(task.task_type, TaskType::ScaleUp);
        assert_eq!(task.data_value("new_instances_ids"), Some("1,2"));
        assert_eq!(task.data_value("current_instances_number"), Some("3"));
        assert_eq!(task.data_value("req"), Some("Net"));
    }

    #[tokio::test]
    async fn scale_while_deploying_is_a_conflict() {
        let state = test_state();
        deploy(
            State(state.clone()),
            Path("dep".to_string()),
            Json(test_topology()),
        )
        .await
        .unwrap();

        let err = scale(
            State(state),
            Path(("dep".to_string(), "Compute".to_string())),
            scale_params(None, Some("1")),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("conflict"));
    }

    #[test]
    fn scale_parameter_validation() {
        let cases = [
            (Some("0"), None, "you need to provide a positive non-zero value as add parameter"),
            (Some("-2"), None, "you need to provide a positive non-zero value as add parameter"),
            (None, Some("x"), "you need to provide a positive non-zero value as remove parameter"),
            (None, None, "you need to provide an add or remove parameter"),
        ];
        for (add, remove, message) in cases {
            let err = scale_params(add, remove).0.delta().unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.message, message);
        }
        assert_eq!(
            scale_params(Some("2"), Some("1")).0.delta().unwrap(),
            ScaleDelta::Add(2)
        );
    }

    #[tokio::test]
    async fn scale_unknown_node() {
        let state = test_state();
        deployed(&state).await;
        let err = scale(
            State(state),
            Path(("dep".to_string(), "Missing".to_string())),
            scale_params(Some("1"), None),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn workflow_and_custom_command() {
        let state = test_state();
        deployed(&state).await;

        let resp = run_workflow(
            State(state.clone()),
            Path(("dep".to_string(), "install".to_string())),
        )
        .await
        .unwrap();
        let task = state.tasks.get(&task_id(&resp)).unwrap();
        assert_eq!(task.data_value("workflowName"), Some("install"));

        let resp = custom_command(
            State(state.clone()),
            Path("dep".to_string()),
            Json(CustomCommandRequest {
                node: "Compute".to_string(),
                name: "restart".to_string(),
                inputs: BTreeMap::from([("grace".to_string(), "10s".to_string())]),
            }),
        )
        .await
        .unwrap();
        let task = state.tasks.get(&task_id(&resp)).unwrap();
        assert_eq!(task.task_type, TaskType::CustomCommand);
        assert_eq!(task.data_value("commandName"), Some("restart"));
        assert_eq!(task.data_value("inputs/grace"), Some("10s"));
    }
}
