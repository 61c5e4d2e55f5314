//! ExecutorRegistry: infrastructure name to executor constructor.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{ExecError, ExecResult};
use crate::executor::{ExecContext, OperationExecutor};
use crate::kubernetes::{self, KubernetesExecutor};
use crate::operation::Operation;

pub type ExecutorConstructor = Box<dyn Fn() -> Arc<dyn OperationExecutor> + Send + Sync>;

/// Built at startup; executors are constructed lazily and then reused.
#[derive(Default)]
pub struct ExecutorRegistry {
    constructors: HashMap<String, ExecutorConstructor>,
    instances: RwLock<HashMap<String, Arc<dyn OperationExecutor>>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("infrastructures", &self.infrastructures())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in executor.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(kubernetes::INFRASTRUCTURE, || -> Arc<dyn OperationExecutor> {
            Arc::new(KubernetesExecutor::new())
        });
        registry
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: &str, constructor: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn OperationExecutor> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_string(), Box::new(constructor));
        self.instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name);
        self
    }

    /// Registered infrastructure names, sorted.
    pub fn infrastructures(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Executor for `name`, built on first use.
    pub fn executor_for(&self, name: &str) -> ExecResult<Arc<dyn OperationExecutor>> {
        if let Some(executor) = self
            .instances
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
        {
            return Ok(executor.clone());
        }

        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ExecError::UnknownInfrastructure(name.to_string()))?;
        let mut instances = self
            .instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let executor = instances
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(infrastructure = %name, "executor constructed");
                constructor()
            })
            .clone();
        Ok(executor)
    }

    /// Run `operation` with the executor of `infrastructure`.
    pub async fn execute(
        &self,
        infrastructure: &str,
        ctx: &ExecContext,
        operation: &Operation,
    ) -> ExecResult<()> {
        let executor = self.executor_for(infrastructure)?;
        executor.exec_operation(ctx, operation).await
    }
}
