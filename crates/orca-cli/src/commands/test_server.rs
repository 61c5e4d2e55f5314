//! orcad router served on an ephemeral port for command tests.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use orca_api::{ApiState, build_router};
use orca_core::Configuration;
use orca_exec::ExecutorRegistry;
use orca_state::{
    DeploymentTopology, InstanceBounds, NodeTemplate, SCALABLE_CAPABILITY, StateStore,
};
use orca_tasks::{TaskData, TaskRegistry, TaskStatus, TaskType};
use orca_workflow::HookRegistry;
use tokio::task::JoinHandle;

use crate::client::ApiClient;

pub struct TestServer {
    pub addr: SocketAddr,
    pub tasks: TaskRegistry,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let tasks = TaskRegistry::new(StateStore::open_in_memory().unwrap());
        let state = ApiState::new(
            tasks.clone(),
            Arc::new(ExecutorRegistry::new()),
            Arc::new(HookRegistry::empty()),
            Arc::new(Configuration::default()),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        Self {
            addr,
            tasks,
            handle,
        }
    }

    pub fn client(&self) -> ApiClient {
        ApiClient::new(&format!("http://{}", self.addr)).unwrap()
    }

    /// Store a one-node topology and register its deploy task.
    pub async fn deploy(&self, deployment_id: &str) -> String {
        let topology = DeploymentTopology {
            nodes: vec![NodeTemplate {
                name: "Compute".to_string(),
                node_type: "orca.nodes.Compute".to_string(),
                derived_from: vec![],
                capabilities: vec![SCALABLE_CAPABILITY.to_string()],
                requirements: vec![],
                instances: InstanceBounds {
                    min: 1,
                    max: 3,
                    default: 1,
                },
                infrastructure: None,
                properties: BTreeMap::new(),
            }],
        };
        self.tasks
            .store()
            .store_topology(deployment_id, &topology)
            .unwrap();
        self.tasks
            .register_task(deployment_id, TaskType::Deploy, TaskData::new())
            .await
            .unwrap()
    }

    /// Move a task to `DONE`.
    pub fn finish(&self, task_id: &str) {
        self.tasks.set_status(task_id, TaskStatus::Running).unwrap();
        self.tasks.set_status(task_id, TaskStatus::Done).unwrap();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
