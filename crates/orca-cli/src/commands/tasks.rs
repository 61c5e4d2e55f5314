//! `orca tasks`: inspect and cancel tasks.

use anyhow::Result;
use http::{Method, StatusCode};
use serde::Deserialize;

use crate::client::ApiClient;

#[derive(Debug, Deserialize)]
struct TaskView {
    id: String,
    status: String,
    #[serde(rename = "type")]
    task_type: String,
}

fn task_path(deployment_id: &str, task_id: &str) -> String {
    format!("/deployments/{deployment_id}/tasks/{task_id}")
}

/// Run `orca tasks info`. Returns the text to print.
pub async fn info(client: &ApiClient, deployment_id: &str, task_id: &str) -> Result<String> {
    let reply = client
        .send(Method::GET, &task_path(deployment_id, task_id))
        .await?;
    reply.expect_status(StatusCode::OK)?;
    let task: TaskView = reply.json()?;
    Ok(format!(
        "Task: {}\nTask status: {}\nTask type: {}",
        task.id, task.status, task.task_type
    ))
}

/// Run `orca tasks cancel`.
pub async fn cancel(client: &ApiClient, deployment_id: &str, task_id: &str) -> Result<String> {
    let reply = client
        .send(Method::DELETE, &task_path(deployment_id, task_id))
        .await?;
    reply.expect_status(StatusCode::ACCEPTED)?;
    Ok(format!("Task {task_id} cancel requested."))
}
