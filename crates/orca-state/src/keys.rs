//! Key layout.
//!
//! ```text
//! _orca/tasks/{task_id}                                         task record (JSON)
//! _orca/deployments/{dep}/tasks/{task_id}                       task index
//! _orca/deployments/{dep}/topology/nodes/{node}/template        NodeTemplate (JSON)
//! _orca/deployments/{dep}/topology/nodes/{node}/nb_instances
//! _orca/deployments/{dep}/topology/instances/{node}/{i}/status
//! _orca/deployments/{dep}/topology/instances/{node}/{i}/attributes/{name}
//! _orca/deployments/{dep}/topology/instances/{node}/{i}/capabilities/{cap}/attributes/{name}
//! _orca/locks/deployments/{dep}                                 (LOCKS table)
//! ```
//!
//! Prefix helpers end with `/` so that `node-1` never matches `node-10`.

pub const ROOT: &str = "_orca";

pub fn task(task_id: &str) -> String {
    format!("{ROOT}/tasks/{task_id}")
}

pub fn deployment(deployment_id: &str) -> String {
    format!("{ROOT}/deployments/{deployment_id}/")
}

pub fn deployment_tasks(deployment_id: &str) -> String {
    format!("{ROOT}/deployments/{deployment_id}/tasks/")
}

pub fn deployment_task(deployment_id: &str, task_id: &str) -> String {
    format!("{}{task_id}", deployment_tasks(deployment_id))
}

pub fn topology(deployment_id: &str) -> String {
    format!("{ROOT}/deployments/{deployment_id}/topology/")
}

pub fn nodes(deployment_id: &str) -> String {
    format!("{}nodes/", topology(deployment_id))
}

pub fn node_template(deployment_id: &str, node: &str) -> String {
    format!("{}{node}/template", nodes(deployment_id))
}

pub fn node_instance_count(deployment_id: &str, node: &str) -> String {
    format!("{}{node}/nb_instances", nodes(deployment_id))
}

/// Prefix of every instance of `node`.
pub fn node_instances(deployment_id: &str, node: &str) -> String {
    format!("{}instances/{node}/", topology(deployment_id))
}

/// Prefix of a single instance subtree.
pub fn instance(deployment_id: &str, node: &str, index: u32) -> String {
    format!("{}{index}/", node_instances(deployment_id, node))
}

pub fn instance_status(deployment_id: &str, node: &str, index: u32) -> String {
    format!("{}status", instance(deployment_id, node, index))
}

pub fn instance_attribute(deployment_id: &str, node: &str, index: u32, name: &str) -> String {
    format!("{}attributes/{name}", instance(deployment_id, node, index))
}

pub fn instance_capability_attribute(
    deployment_id: &str,
    node: &str,
    index: u32,
    capability: &str,
    name: &str,
) -> String {
    format!(
        "{}capabilities/{capability}/attributes/{name}",
        instance(deployment_id, node, index)
    )
}

pub fn deployment_lock(deployment_id: &str) -> String {
    format!("{ROOT}/locks/deployments/{deployment_id}")
}

/// Parse the instance index that follows `prefix` in `key`, if any.
pub fn instance_index(prefix: &str, key: &str) -> Option<u32> {
    key.strip_prefix(prefix)?.split('/').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_keys_nest_under_node_prefix() {
        let prefix = node_instances("dep", "Compute");
        let key = instance_capability_attribute("dep", "Compute", 3, "endpoint", "ip_address");
        assert!(key.starts_with(&prefix));
        assert!(key.ends_with("/3/capabilities/endpoint/attributes/ip_address"));
        assert_eq!(instance_index(&prefix, &key), Some(3));
    }

    #[test]
    fn node_prefix_does_not_match_longer_names() {
        let prefix = node_instances("dep", "node-1");
        let other = instance_status("dep", "node-10", 0);
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn instance_index_ignores_non_numeric_segments() {
        let prefix = node_instances("dep", "n");
        assert_eq!(instance_index(&prefix, &format!("{prefix}abc/status")), None);
        assert_eq!(instance_index(&prefix, "_orca/elsewhere"), None);
    }
}
