//! ScalingCoordinator: computes bounded instance deltas, allocates or retires
//! instances and registers the matching scale task.

use tracing::{debug, info};

use orca_state::{NodeTemplate, StateError, StateStore};
use orca_tasks::{TaskData, TaskRegistry, TaskType};

use crate::error::{ScaleError, ScaleResult};

/// Requirement kinds whose target nodes scale together with the dependent.
pub const LINKED_REQUIREMENTS: [&str; 2] = ["network", "local_storage"];

/// Result of a scale request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleOutcome {
    pub task_id: String,
    pub node: String,
    /// Delta asked for by the caller.
    pub requested: u32,
    /// Delta applied after clamping to the node bounds.
    pub effective_delta: u32,
    /// Allocated ids (ascending) for scale up, retired ids (descending) for
    /// scale down.
    pub instance_ids: Vec<u32>,
    /// Instance count of the node after the operation.
    pub current_instances: u32,
    /// Requirement targets that were scaled along.
    pub linked_nodes: Vec<String>,
}

/// Number of instances a scale up by `requested` may add.
pub fn clamp_scale_up(current: u32, max: u32, requested: u32) -> u32 {
    requested.min(max.saturating_sub(current))
}

/// Number of instances a scale down by `requested` may remove.
pub fn clamp_scale_down(current: u32, min: u32, requested: u32) -> u32 {
    requested.min(current.saturating_sub(min))
}

#[derive(Debug, Clone)]
pub struct ScalingCoordinator {
    tasks: TaskRegistry,
}

impl ScalingCoordinator {
    pub fn new(tasks: TaskRegistry) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Add up to `delta` instances to `node`, never exceeding its max.
    pub async fn scale_up(
        &self,
        deployment_id: &str,
        node: &str,
        delta: u32,
    ) -> ScaleResult<ScaleOutcome> {
        let template = self.scalable_node(deployment_id, node, delta)?;
        let linked = template.requirement_targets(&LINKED_REQUIREMENTS);
        let max = template.instances.max;

        let (task_id, mut outcome) = self
            .tasks
            .register_task_with(
                deployment_id,
                TaskType::ScaleUp,
                |store| -> ScaleResult<(TaskData, ScaleOutcome)> {
                    let current = store.node_instance_ids(deployment_id, node)?.len() as u32;
                    let effective = clamp_scale_up(current, max, delta);
                    if effective < delta {
                        debug!(
                            deployment = %deployment_id,
                            %node,
                            requested = delta,
                            effective,
                            max,
                            "scale up clamped to max instances"
                        );
                    }

                    for target in &linked {
                        store.create_instances(deployment_id, target, effective)?;
                        sync_instance_count(store, deployment_id, target)?;
                    }
                    let created = store.create_instances(deployment_id, node, effective)?;
                    let after = current + effective;
                    store.set_instance_count(deployment_id, node, after)?;

                    let outcome = ScaleOutcome {
                        task_id: String::new(),
                        node: node.to_string(),
                        requested: delta,
                        effective_delta: effective,
                        instance_ids: created,
                        current_instances: after,
                        linked_nodes: linked.clone(),
                    };
                    Ok((scale_task_data(&outcome), outcome))
                },
            )
            .await?;

        outcome.task_id = task_id;
        info!(
            deployment = %deployment_id,
            %node,
            task = %outcome.task_id,
            added = outcome.effective_delta,
            instances = outcome.current_instances,
            "scale up registered"
        );
        Ok(outcome)
    }

    /// Remove up to `delta` instances from `node`, never going below its min.
    ///
    /// The highest live indices are retired. Their state subtrees are deleted
    /// on every linked requirement node and on `node` itself before the task
    /// is persisted, under the same lock hold.
    pub async fn scale_down(
        &self,
        deployment_id: &str,
        node: &str,
        delta: u32,
    ) -> ScaleResult<ScaleOutcome> {
        let template = self.scalable_node(deployment_id, node, delta)?;
        let linked = template.requirement_targets(&LINKED_REQUIREMENTS);
        let min = template.instances.min;

        let (task_id, mut outcome) = self
            .tasks
            .register_task_with(
                deployment_id,
                TaskType::ScaleDown,
                |store| -> ScaleResult<(TaskData, ScaleOutcome)> {
                    let live = store.node_instance_ids(deployment_id, node)?;
                    let current = live.len() as u32;
                    let effective = clamp_scale_down(current, min, delta);
                    if effective < delta {
                        debug!(
                            deployment = %deployment_id,
                            %node,
                            requested = delta,
                            effective,
                            min,
                            "scale down clamped to min instances"
                        );
                    }

                    let retired: Vec<u32> =
                        live.iter().rev().take(effective as usize).copied().collect();

                    for target in &linked {
                        for &index in &retired {
                            store.delete_instance(deployment_id, target, index)?;
                        }
                        sync_instance_count(store, deployment_id, target)?;
                    }
                    for &index in &retired {
                        store.delete_instance(deployment_id, node, index)?;
                    }
                    let after = current - effective;
                    store.set_instance_count(deployment_id, node, after)?;

                    let outcome = ScaleOutcome {
                        task_id: String::new(),
                        node: node.to_string(),
                        requested: delta,
                        effective_delta: effective,
                        instance_ids: retired,
                        current_instances: after,
                        linked_nodes: linked.clone(),
                    };
                    Ok((scale_task_data(&outcome), outcome))
                },
            )
            .await?;

        outcome.task_id = task_id;
        info!(
            deployment = %deployment_id,
            %node,
            task = %outcome.task_id,
            removed = outcome.effective_delta,
            instances = outcome.current_instances,
            "scale down registered"
        );
        Ok(outcome)
    }

    /// Validate a scale request and return the node template.
    fn scalable_node(&self, deployment_id: &str, node: &str, delta: u32) -> ScaleResult<NodeTemplate> {
        if node.is_empty() {
            return Err(ScaleError::Validation("you must provide a node name".to_string()));
        }
        if delta == 0 {
            return Err(ScaleError::Validation(
                "the scaling delta must be a positive non-zero value".to_string(),
            ));
        }
        let template = self
            .tasks
            .store()
            .get_node(deployment_id, node)?
            .ok_or_else(|| ScaleError::NodeNotFound {
                deployment_id: deployment_id.to_string(),
                node: node.to_string(),
            })?;
        if !template.is_scalable() {
            return Err(ScaleError::Validation(format!(
                "node {node:?} must be scalable"
            )));
        }
        Ok(template)
    }
}

fn sync_instance_count(store: &StateStore, deployment_id: &str, node: &str) -> Result<(), StateError> {
    let count = store.node_instance_ids(deployment_id, node)?.len() as u32;
    store.set_instance_count(deployment_id, node, count)
}

fn scale_task_data(outcome: &ScaleOutcome) -> TaskData {
    let ids: Vec<String> = outcome.instance_ids.iter().map(u32::to_string).collect();
    TaskData::from([
        ("node".to_string(), outcome.node.clone()),
        ("new_instances_ids".to_string(), ids.join(",")),
        (
            "current_instances_number".to_string(),
            outcome.current_instances.to_string(),
        ),
        ("req".to_string(), outcome.linked_nodes.join(",")),
    ])
}
