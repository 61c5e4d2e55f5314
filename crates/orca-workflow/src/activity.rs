//! Workflow activities as reported by the workflow engine.

use serde::{Deserialize, Serialize};

use orca_exec::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityType {
    /// Whole-node lifecycle step handed to the infrastructure.
    Delegate,
    SetState,
    CallOperation,
    /// Nested workflow.
    Inline,
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityType::Delegate => write!(f, "delegate"),
            ActivityType::SetState => write!(f, "set-state"),
            ActivityType::CallOperation => write!(f, "call-operation"),
            ActivityType::Inline => write!(f, "inline"),
        }
    }
}

/// One step of a workflow. `value` is the delegated step, the target state,
/// the operation name or the inlined workflow depending on `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: ActivityType,
    pub value: String,
}

impl Activity {
    pub fn new(kind: ActivityType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn delegate(value: impl Into<String>) -> Self {
        Self::new(ActivityType::Delegate, value)
    }

    pub fn call_operation(value: impl Into<String>) -> Self {
        Self::new(ActivityType::CallOperation, value)
    }

    pub fn set_state(value: impl Into<String>) -> Self {
        Self::new(ActivityType::SetState, value)
    }

    pub fn inline(value: impl Into<String>) -> Self {
        Self::new(ActivityType::Inline, value)
    }

    /// Operation an executor performs for this activity, if any.
    ///
    /// Delegated steps become `delegate.<step>`.
    pub fn operation(&self) -> Option<Operation> {
        match self.kind {
            ActivityType::Delegate => Some(Operation::new(format!("delegate.{}", self.value))),
            ActivityType::CallOperation => Some(Operation::new(self.value.clone())),
            ActivityType::SetState | ActivityType::Inline => None,
        }
    }
}
