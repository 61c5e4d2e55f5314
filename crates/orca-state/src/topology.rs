//! Typed topology accessors: node templates, instance index sets and
//! instance attributes.
//!
//! The live instance set of a node is derived from the keys present under
//! its instance prefix, never from the stored count alone, so a gap left by
//! a partially failed operation is visible to the next allocation.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::keys;
use crate::store::{KvOp, StateStore};
use crate::types::*;

/// Status written for a freshly allocated instance.
pub const INITIAL_INSTANCE_STATUS: &str = "initial";

impl StateStore {
    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node template.
    pub fn put_node(&self, deployment_id: &str, node: &NodeTemplate) -> StateResult<()> {
        self.put_json(&keys::node_template(deployment_id, &node.name), node)
    }

    /// Get a node template by name.
    pub fn get_node(&self, deployment_id: &str, node: &str) -> StateResult<Option<NodeTemplate>> {
        self.get_json(&keys::node_template(deployment_id, node))
    }

    /// Get a node template, failing with `NotFound` when absent.
    pub fn require_node(&self, deployment_id: &str, node: &str) -> StateResult<NodeTemplate> {
        self.get_node(deployment_id, node)?
            .ok_or_else(|| StateError::NotFound(format!("node {node:?} in deployment {deployment_id:?}")))
    }

    /// List all node templates of a deployment.
    pub fn list_nodes(&self, deployment_id: &str) -> StateResult<Vec<NodeTemplate>> {
        let mut results = Vec::new();
        for (key, value) in self.list(&keys::nodes(deployment_id))? {
            if key.ends_with("/template") {
                let node = serde_json::from_str(&value)
                    .map_err(|e| StateError::Deserialize(e.to_string()))?;
                results.push(node);
            }
        }
        Ok(results)
    }

    pub fn has_scalable_capability(&self, deployment_id: &str, node: &str) -> StateResult<bool> {
        Ok(self.require_node(deployment_id, node)?.is_scalable())
    }

    pub fn is_node_derived_from(
        &self,
        deployment_id: &str,
        node: &str,
        type_name: &str,
    ) -> StateResult<bool> {
        Ok(self.require_node(deployment_id, node)?.is_derived_from(type_name))
    }

    /// Requirement targets of `node` restricted to the given requirement names.
    pub fn requirement_targets(
        &self,
        deployment_id: &str,
        node: &str,
        kinds: &[&str],
    ) -> StateResult<Vec<String>> {
        Ok(self.require_node(deployment_id, node)?.requirement_targets(kinds))
    }

    // ── Instance sets ──────────────────────────────────────────────

    /// Live instance indices of `node`, ascending.
    pub fn node_instance_ids(&self, deployment_id: &str, node: &str) -> StateResult<Vec<u32>> {
        let prefix = keys::node_instances(deployment_id, node);
        let ids: BTreeSet<u32> = self
            .list_keys(&prefix)?
            .iter()
            .filter_map(|key| keys::instance_index(&prefix, key))
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Allocate `count` new instances of `node` on the lowest unused indices.
    ///
    /// Returns the new indices in ascending order.
    pub fn create_instances(
        &self,
        deployment_id: &str,
        node: &str,
        count: u32,
    ) -> StateResult<Vec<u32>> {
        let live: BTreeSet<u32> = self.node_instance_ids(deployment_id, node)?.into_iter().collect();
        let created: Vec<u32> = (0u32..)
            .filter(|i| !live.contains(i))
            .take(count as usize)
            .collect();
        let ops: Vec<KvOp> = created
            .iter()
            .map(|&i| {
                KvOp::put(
                    keys::instance_status(deployment_id, node, i),
                    INITIAL_INSTANCE_STATUS,
                )
            })
            .collect();
        self.apply(&ops)?;
        debug!(deployment = %deployment_id, %node, ?created, "instances allocated");
        Ok(created)
    }

    /// Delete the whole state subtree of one instance. Returns true if it existed.
    pub fn delete_instance(&self, deployment_id: &str, node: &str, index: u32) -> StateResult<bool> {
        let removed = self.delete_tree(&keys::instance(deployment_id, node, index))?;
        Ok(removed > 0)
    }

    /// Recorded instance count of `node`.
    pub fn instance_count(&self, deployment_id: &str, node: &str) -> StateResult<Option<u32>> {
        match self.get(&keys::node_instance_count(deployment_id, node))? {
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|e: std::num::ParseIntError| StateError::Deserialize(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn set_instance_count(&self, deployment_id: &str, node: &str, count: u32) -> StateResult<()> {
        self.put(&keys::node_instance_count(deployment_id, node), &count.to_string())
    }

    // ── Instance attributes ────────────────────────────────────────

    pub fn instance_attribute(
        &self,
        deployment_id: &str,
        node: &str,
        index: u32,
        name: &str,
    ) -> StateResult<Option<String>> {
        self.get(&keys::instance_attribute(deployment_id, node, index, name))
    }

    pub fn set_instance_attribute(
        &self,
        deployment_id: &str,
        node: &str,
        index: u32,
        name: &str,
        value: &str,
    ) -> StateResult<()> {
        self.put(&keys::instance_attribute(deployment_id, node, index, name), value)
    }

    pub fn instance_capability_attribute(
        &self,
        deployment_id: &str,
        node: &str,
        index: u32,
        capability: &str,
        name: &str,
    ) -> StateResult<Option<String>> {
        self.get(&keys::instance_capability_attribute(
            deployment_id,
            node,
            index,
            capability,
            name,
        ))
    }

    pub fn set_instance_capability_attribute(
        &self,
        deployment_id: &str,
        node: &str,
        index: u32,
        capability: &str,
        name: &str,
        value: &str,
    ) -> StateResult<()> {
        self.put(
            &keys::instance_capability_attribute(deployment_id, node, index, capability, name),
            value,
        )
    }

    // ── Whole topologies ───────────────────────────────────────────

    /// Store every node of `topology` and allocate its default instances.
    ///
    /// Nodes that already have instances keep them.
    pub fn store_topology(
        &self,
        deployment_id: &str,
        topology: &DeploymentTopology,
    ) -> StateResult<()> {
        for node in &topology.nodes {
            self.put_node(deployment_id, node)?;
            let live = self.node_instance_ids(deployment_id, &node.name)?.len() as u32;
            let missing = node.instances.default.saturating_sub(live);
            self.create_instances(deployment_id, &node.name, missing)?;
            self.set_instance_count(deployment_id, &node.name, live + missing)?;
        }
        debug!(deployment = %deployment_id, nodes = topology.nodes.len(), "topology stored");
        Ok(())
    }

    /// Whether any topology is stored for the deployment.
    pub fn deployment_exists(&self, deployment_id: &str) -> StateResult<bool> {
        Ok(!self.list_keys(&keys::nodes(deployment_id))?.is_empty())
    }

    /// Delete the whole topology subtree. Returns the number of keys removed.
    pub fn delete_deployment_topology(&self, deployment_id: &str) -> StateResult<u32> {
        self.delete_tree(&keys::topology(deployment_id))
    }
}
