//! Ensures compute instances expose an `endpoint.ip_address`.
//!
//! After a delegate or call-operation activity on a compute node, every
//! instance lacking the endpoint address gets it copied from the first
//! address attribute present, in this order:
//! `public_ip_address`, `public_address`, `private_address`, `ip_address`.
//! An endpoint address already set is never overwritten, so running the
//! hook repeatedly is harmless.

use tracing::debug;

use orca_state::COMPUTE_TYPE;
use orca_tasks::TaskStatus;

use crate::activity::Activity;
use crate::hooks::{ActivityHook, HookContext};

pub const ENDPOINT_CAPABILITY: &str = "endpoint";
pub const IP_ADDRESS: &str = "ip_address";

/// Instance attributes checked for an address, highest priority first.
pub const ADDRESS_ATTRIBUTES: [&str; 4] = [
    "public_ip_address",
    "public_address",
    "private_address",
    "ip_address",
];

#[derive(Debug, Clone)]
pub struct ComputeEndpointHook {
    compute_type: String,
}

impl Default for ComputeEndpointHook {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeEndpointHook {
    pub fn new() -> Self {
        Self {
            compute_type: COMPUTE_TYPE.to_string(),
        }
    }

    /// Override the base type identifying compute nodes.
    pub fn with_compute_type(mut self, compute_type: impl Into<String>) -> Self {
        self.compute_type = compute_type.into();
        self
    }
}

impl ActivityHook for ComputeEndpointHook {
    fn name(&self) -> &str {
        "compute-endpoint"
    }

    fn after_activity(&self, ctx: &HookContext, _activity: &Activity) -> anyhow::Result<()> {
        let status = ctx.task_status()?;
        if matches!(status, TaskStatus::Failed | TaskStatus::Canceled) {
            return Ok(());
        }

        let store = &ctx.store;
        let (dep, node) = (ctx.deployment_id.as_str(), ctx.target.as_str());
        if !store.is_node_derived_from(dep, node, &self.compute_type)? {
            return Ok(());
        }

        for index in store.node_instance_ids(dep, node)? {
            if store
                .instance_capability_attribute(dep, node, index, ENDPOINT_CAPABILITY, IP_ADDRESS)?
                .is_some()
            {
                continue;
            }
            for attribute in ADDRESS_ATTRIBUTES {
                let Some(address) = store
                    .instance_attribute(dep, node, index, attribute)?
                    .filter(|value| !value.is_empty())
                else {
                    continue;
                };
                store.set_instance_capability_attribute(
                    dep,
                    node,
                    index,
                    ENDPOINT_CAPABILITY,
                    IP_ADDRESS,
                    &address,
                )?;
                debug!(
                    deployment = %dep,
                    %node,
                    instance = index,
                    from = attribute,
                    %address,
                    "endpoint ip address set"
                );
                break;
            }
        }
        Ok(())
    }
}
