//! Topology types persisted by the state store.
//!
//! Only what the coordinator queries is modelled here: type ancestry,
//! capabilities, instance bounds and requirement edges.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for a deployment.
pub type DeploymentId = String;

/// Capability marking a node whose instance count may change at runtime.
pub const SCALABLE_CAPABILITY: &str = "scalable";

/// Base type of every compute node.
pub const COMPUTE_TYPE: &str = "orca.nodes.Compute";

/// A named element of a deployed topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeTemplate {
    pub name: String,
    /// Concrete type, e.g. "orca.nodes.kubernetes.Pod".
    #[serde(rename = "type")]
    pub node_type: String,
    /// Ancestor types, nearest first.
    #[serde(default)]
    pub derived_from: Vec<String>,
    /// Capability names exposed by the node.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    pub instances: InstanceBounds,
    /// Infrastructure whose executor provisions this node.
    #[serde(default)]
    pub infrastructure: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Declared instance-count range for a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceBounds {
    pub min: u32,
    pub max: u32,
    /// Instances created at deploy time.
    pub default: u32,
}

/// A typed edge to another node (e.g. "network", "local_storage").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    /// Target node name.
    pub node: String,
    #[serde(default)]
    pub capability: Option<String>,
}

/// Topology uploaded with a deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeploymentTopology {
    pub nodes: Vec<NodeTemplate>,
}

impl NodeTemplate {
    /// Whether this node is of type `type_name` or derives from it.
    pub fn is_derived_from(&self, type_name: &str) -> bool {
        self.node_type == type_name || self.derived_from.iter().any(|t| t == type_name)
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn is_scalable(&self) -> bool {
        self.has_capability(SCALABLE_CAPABILITY)
    }

    /// Target node names of requirements whose name is one of `kinds`, in
    /// declaration order, without duplicates.
    pub fn requirement_targets(&self, kinds: &[&str]) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for req in &self.requirements {
            if kinds.contains(&req.name.as_str()) && !targets.contains(&req.node) {
                targets.push(req.node.clone());
            }
        }
        targets
    }
}
