//! Provisioning operations as handed to executors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A fully qualified operation, e.g. `tosca.interfaces.node.lifecycle.Standard.create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

impl Operation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Last `.`-separated element of the name.
    pub fn operation_name(&self) -> &str {
        self.name
            .rsplit_once('.')
            .map_or(self.name.as_str(), |(_, op)| op)
    }

    /// Everything before the last `.`; empty for an unqualified name.
    pub fn interface_name(&self) -> &str {
        self.name.rsplit_once('.').map_or("", |(iface, _)| iface)
    }
}
