//! `orca deployments`: lifecycle requests on a deployment.

use anyhow::Result;
use http::{Method, StatusCode};

use crate::client::ApiClient;

/// Direction of a scale request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Add(u32),
    Remove(u32),
}

/// Run `orca deployments undeploy`.
pub async fn undeploy(client: &ApiClient, deployment_id: &str, purge: bool) -> Result<String> {
    let mut path = format!("/deployments/{deployment_id}");
    if purge {
        path.push_str("?purge=true");
    }
    let reply = client.send(Method::DELETE, &path).await?;
    reply.expect_status(StatusCode::ACCEPTED)?;
    Ok(format!(
        "Undeployment submitted. In progress...\nTask: {}",
        reply.require_location()?
    ))
}

/// Run `orca deployments scale`.
pub async fn scale(
    client: &ApiClient,
    deployment_id: &str,
    node: &str,
    request: Scale,
) -> Result<String> {
    let query = match request {
        Scale::Add(n) => format!("add={n}"),
        Scale::Remove(n) => format!("remove={n}"),
    };
    let reply = client
        .send(
            Method::POST,
            &format!("/deployments/{deployment_id}/scale/{node}?{query}"),
        )
        .await?;
    reply.expect_status(StatusCode::ACCEPTED)?;
    Ok(format!(
        "Scaling request submitted.\nTask: {}",
        reply.require_location()?
    ))
}
