//! orca-api: REST API for the Orca orchestrator.
//!
//! Lifecycle requests register a task and answer `202 Accepted` with a
//! `Location: /deployments/{id}/tasks/{task_id}` header and no body.
//! Errors use the `{ "success": false, "error": "…" }` envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | PUT | `/deployments/{id}` | Store a topology and register a deploy |
//! | DELETE | `/deployments/{id}` | Register an undeploy (`?purge=true` for a purge) |
//! | POST | `/deployments/{id}/scale/{node}` | Scale a node (`?add=N` or `?remove=N`) |
//! | POST | `/deployments/{id}/workflows/{name}` | Register a workflow run |
//! | POST | `/deployments/{id}/custom` | Register a custom command |
//! | GET | `/deployments/{id}/tasks` | List tasks |
//! | GET | `/deployments/{id}/tasks/{task}` | Get a task |
//! | DELETE | `/deployments/{id}/tasks/{task}` | Cancel a task |
//! | PUT | `/deployments/{id}/tasks/{task}/status` | Report a task status |
//! | POST | `/deployments/{id}/tasks/{task}/activities` | Report a finished activity |

pub mod error;
pub mod handlers;
pub mod task_handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};

use orca_core::Configuration;
use orca_exec::ExecutorRegistry;
use orca_scaling::ScalingCoordinator;
use orca_tasks::TaskRegistry;
use orca_workflow::{ActivityRunner, HookRegistry};

pub use error::ApiError;

/// Shared state for API handlers.
#[derive(Debug, Clone)]
pub struct ApiState {
    pub tasks: TaskRegistry,
    pub scaling: ScalingCoordinator,
    pub runner: ActivityRunner,
}

impl ApiState {
    pub fn new(
        tasks: TaskRegistry,
        executors: Arc<ExecutorRegistry>,
        hooks: Arc<HookRegistry>,
        config: Arc<Configuration>,
    ) -> Self {
        Self {
            scaling: ScalingCoordinator::new(tasks.clone()),
            runner: ActivityRunner::new(tasks.clone(), executors, hooks, config),
            tasks,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/deployments/{id}",
            put(handlers::deploy).delete(handlers::undeploy),
        )
        .route("/deployments/{id}/scale/{node}", post(handlers::scale))
        .route("/deployments/{id}/workflows/{name}", post(handlers::run_workflow))
        .route("/deployments/{id}/custom", post(handlers::custom_command))
        .route("/deployments/{id}/tasks", get(task_handlers::list_tasks))
        .route(
            "/deployments/{id}/tasks/{task}",
            get(task_handlers::get_task).delete(task_handlers::cancel_task),
        )
        .route(
            "/deployments/{id}/tasks/{task}/status",
            put(task_handlers::update_task_status),
        )
        .route(
            "/deployments/{id}/tasks/{task}/activities",
            post(task_handlers::report_activity),
        )
        .with_state(state)
}
