//! ActivityRunner: executes reported workflow activities against the
//! node's infrastructure and runs the post-activity hooks.

use std::sync::Arc;

use tracing::{error, info, warn};

use orca_core::Configuration;
use orca_exec::{ExecContext, ExecutorRegistry, Operation};
use orca_tasks::{Task, TaskError, TaskRegistry, TaskStatus, TaskType};

use crate::activity::Activity;
use crate::error::{WorkflowError, WorkflowResult};
use crate::hooks::{HookContext, HookRegistry, HookReport};

/// What [`ActivityRunner::run_activity`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityOutcome {
    /// The task was canceled; nothing ran.
    pub skipped: bool,
    /// An operation was handed to an executor.
    pub executed: bool,
    pub hooks: HookReport,
}

#[derive(Debug, Clone)]
pub struct ActivityRunner {
    tasks: TaskRegistry,
    executors: Arc<ExecutorRegistry>,
    hooks: Arc<HookRegistry>,
    config: Arc<Configuration>,
}

impl ActivityRunner {
    pub fn new(
        tasks: TaskRegistry,
        executors: Arc<ExecutorRegistry>,
        hooks: Arc<HookRegistry>,
        config: Arc<Configuration>,
    ) -> Self {
        Self {
            tasks,
            executors,
            hooks,
            config,
        }
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Run one activity of task `task_id` on `node`.
    ///
    /// `operation` overrides the one derived from the activity. Executor
    /// failures mark the task `FAILED` and are returned; hook failures are
    /// only reported in the outcome.
    pub async fn run_activity(
        &self,
        task_id: &str,
        deployment_id: &str,
        node: &str,
        activity: &Activity,
        operation: Option<Operation>,
    ) -> WorkflowResult<ActivityOutcome> {
        let task = self.tasks.get(task_id)?;
        if task.target_id != deployment_id {
            return Err(TaskError::NotFound(task_id.to_string()).into());
        }
        if task.status == TaskStatus::Canceled {
            info!(deployment = %deployment_id, task = %task_id, %node, activity = %activity.kind, "task canceled, activity skipped");
            return Ok(ActivityOutcome {
                skipped: true,
                ..ActivityOutcome::default()
            });
        }

        match self.tasks.set_status(task_id, TaskStatus::Running) {
            Ok(_) => {}
            // Canceled between the read above and the transition.
            Err(TaskError::IllegalTransition {
                from: TaskStatus::Canceled,
                ..
            }) => {
                return Ok(ActivityOutcome {
                    skipped: true,
                    ..ActivityOutcome::default()
                });
            }
            Err(e) => return Err(e.into()),
        }

        let mut outcome = ActivityOutcome::default();
        if let Some(operation) = operation.or_else(|| activity.operation()) {
            self.execute(task_id, deployment_id, node, &operation).await?;
            outcome.executed = true;
        }

        let ctx = HookContext {
            store: self.tasks.store().clone(),
            config: self.config.clone(),
            task_id: task_id.to_string(),
            deployment_id: deployment_id.to_string(),
            target: node.to_string(),
        };
        outcome.hooks = self.hooks.run(&ctx, activity);
        Ok(outcome)
    }

    /// Dispatch `operation`. Any failure, including an unresolvable node or
    /// infrastructure, marks the task `FAILED`.
    async fn execute(
        &self,
        task_id: &str,
        deployment_id: &str,
        node: &str,
        operation: &Operation,
    ) -> WorkflowResult<()> {
        let result = self.dispatch(task_id, deployment_id, node, operation).await;
        if let Err(e) = &result {
            error!(
                deployment = %deployment_id,
                task = %task_id,
                %node,
                operation = %operation.name,
                error = %e,
                "operation failed"
            );
            if let Err(status_err) = self.tasks.set_status(task_id, TaskStatus::Failed) {
                warn!(task = %task_id, error = %status_err, "could not mark task failed");
            }
        }
        result
    }

    async fn dispatch(
        &self,
        task_id: &str,
        deployment_id: &str,
        node: &str,
        operation: &Operation,
    ) -> WorkflowResult<()> {
        let template = self.tasks.store().require_node(deployment_id, node)?;
        let infrastructure = template.infrastructure.ok_or_else(|| {
            WorkflowError::Validation(format!(
                "node {node:?} of deployment {deployment_id:?} has no infrastructure"
            ))
        })?;

        let ctx = ExecContext {
            store: self.tasks.store().clone(),
            config: self.config.clone(),
            task_id: task_id.to_string(),
            deployment_id: deployment_id.to_string(),
            node_name: node.to_string(),
        };
        self.executors
            .execute(&infrastructure, &ctx, operation)
            .await?;
        Ok(())
    }

    /// Mark the task `DONE`, passing through `RUNNING` if it never started.
    ///
    /// A finished purge also removes the deployment topology.
    pub fn finish(&self, task_id: &str) -> WorkflowResult<Task> {
        if self.tasks.status(task_id)? == TaskStatus::Created {
            self.tasks.set_status(task_id, TaskStatus::Running)?;
        }
        let task = self.tasks.set_status(task_id, TaskStatus::Done)?;
        if task.task_type == TaskType::Purge {
            let removed = self.tasks.store().delete_deployment_topology(&task.target_id)?;
            info!(deployment = %task.target_id, task = %task_id, keys = removed, "deployment purged");
        }
        info!(deployment = %task.target_id, task = %task_id, "task done");
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use orca_exec::{BoxFuture, ExecError, ExecResult, OperationExecutor};
    use orca_state::{COMPUTE_TYPE, InstanceBounds, NodeTemplate, StateStore};
    use orca_tasks::TaskData;

    use crate::endpoint::{ComputeEndpointHook, ENDPOINT_CAPABILITY, IP_ADDRESS};

    #[derive(Default)]
    struct FakeExecutor {
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    impl OperationExecutor for FakeExecutor {
        fn exec_operation<'a>(
            &'a self,
            ctx: &'a ExecContext,
            operation: &'a Operation,
        ) -> BoxFuture<'a, ExecResult<()>> {
            Box::pin(async move {
                self.calls
                    .lock()
                    .unwrap()
                    .push(format!("{}:{}", ctx.node_name, operation.name));
                if self.fail {
                    return Err(ExecError::Rejected {
                        operation: operation.name.clone(),
                        status: 500,
                        body: "boom".to_string(),
                    });
                }
                ctx.store.set_instance_attribute(
                    &ctx.deployment_id,
                    &ctx.node_name,
                    0,
                    "public_ip_address",
                    "10.0.0.1",
                )?;
                Ok(())
            })
        }
    }

    struct Fixture {
        runner: ActivityRunner,
        executor: Arc<FakeExecutor>,
        task_id: String,
    }

    async fn fixture(fail: bool, infrastructure: Option<&str>) -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_node(
                "dep",
                &NodeTemplate {
                    name: "Compute".to_string(),
                    node_type: COMPUTE_TYPE.to_string(),
                    derived_from: vec![],
                    capabilities: vec![],
                    requirements: vec![],
                    instances: InstanceBounds {
                        min: 1,
                        max: 1,
                        default: 1,
                    },
                    infrastructure: infrastructure.map(str::to_string),
                    properties: BTreeMap::new(),
                },
            )
            .unwrap();
        store.create_instances("dep", "Compute", 1).unwrap();

        let tasks = TaskRegistry::new(store);
        let task_id = tasks
            .register_task("dep", TaskType::Deploy, TaskData::new())
            .await
            .unwrap();

        let executor = Arc::new(FakeExecutor {
            fail,
            ..FakeExecutor::default()
        });
        let mut executors = ExecutorRegistry::new();
        {
            let executor = executor.clone();
            executors.register("fake", move || -> Arc<dyn OperationExecutor> {
                executor.clone()
            });
        }
        let hooks = HookRegistry::builder()
            .register(ComputeEndpointHook::new())
            .build();

        Fixture {
            runner: ActivityRunner::new(
                tasks,
                Arc::new(executors),
                Arc::new(hooks),
                Arc::new(Configuration::default()),
            ),
            executor,
            task_id,
        }
    }

    fn endpoint(runner: &ActivityRunner) -> Option<String> {
        runner
            .tasks()
            .store()
            .instance_capability_attribute("dep", "Compute", 0, ENDPOINT_CAPABILITY, IP_ADDRESS)
            .unwrap()
    }

    #[tokio::test]
    async fn delegate_executes_then_runs_hooks() {
        let f = fixture(false, Some("fake")).await;
        let outcome = f
            .runner
            .run_activity(&f.task_id, "dep", "Compute", &Activity::delegate("install"), None)
            .await
            .unwrap();

        assert!(outcome.executed);
        assert!(!outcome.skipped);
        assert_eq!(outcome.hooks.invoked, 1);
        assert_eq!(
            *f.executor.calls.lock().unwrap(),
            vec!["Compute:delegate.install".to_string()]
        );
        assert_eq!(f.runner.tasks().status(&f.task_id).unwrap(), TaskStatus::Running);
        assert_eq!(endpoint(&f.runner).as_deref(), Some("10.0.0.1"));

        f.runner.finish(&f.task_id).unwrap();
        assert_eq!(f.runner.tasks().status(&f.task_id).unwrap(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn explicit_operation_overrides_activity() {
        let f = fixture(false, Some("fake")).await;
        f.runner
            .run_activity(
                &f.task_id,
                "dep",
                "Compute",
                &Activity::call_operation("Standard.create"),
                Some(Operation::new("Standard.configure")),
            )
            .await
            .unwrap();
        assert_eq!(
            *f.executor.calls.lock().unwrap(),
            vec!["Compute:Standard.configure".to_string()]
        );
    }

    #[tokio::test]
    async fn set_state_runs_nothing() {
        let f = fixture(false, Some("fake")).await;
        let outcome = f
            .runner
            .run_activity(&f.task_id, "dep", "Compute", &Activity::set_state("started"), None)
            .await
            .unwrap();
        assert!(!outcome.executed);
        assert_eq!(outcome.hooks.invoked, 0);
        assert!(f.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn executor_failure_marks_task_failed() {
        let f = fixture(true, Some("fake")).await;
        let err = f
            .runner
            .run_activity(&f.task_id, "dep", "Compute", &Activity::delegate("install"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Exec(ExecError::Rejected { status: 500, .. })));
        assert_eq!(f.runner.tasks().status(&f.task_id).unwrap(), TaskStatus::Failed);
        assert_eq!(endpoint(&f.runner), None);
    }

    #[tokio::test]
    async fn canceled_task_is_skipped() {
        let f = fixture(false, Some("fake")).await;
        f.runner.tasks().cancel(&f.task_id).unwrap();
        let outcome = f
            .runner
            .run_activity(&f.task_id, "dep", "Compute", &Activity::delegate("install"), None)
            .await
            .unwrap();
        assert!(outcome.skipped);
        assert!(f.executor.calls.lock().unwrap().is_empty());
        assert_eq!(f.runner.tasks().status(&f.task_id).unwrap(), TaskStatus::Canceled);
    }

    #[tokio::test]
    async fn node_without_infrastructure_is_rejected() {
        let f = fixture(false, None).await;
        let err = f
            .runner
            .run_activity(&f.task_id, "dep", "Compute", &Activity::delegate("install"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));
        assert_eq!(f.runner.tasks().status(&f.task_id).unwrap(), TaskStatus::Failed);

        // The failed task no longer blocks the deployment.
        f.runner
            .tasks()
            .register_task("dep", TaskType::Undeploy, TaskData::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_node_marks_task_failed() {
        let f = fixture(false, Some("fake")).await;
        assert!(
            f.runner
                .run_activity(&f.task_id, "dep", "Ghost", &Activity::delegate("install"), None)
                .await
                .is_err()
        );
        assert_eq!(f.runner.tasks().status(&f.task_id).unwrap(), TaskStatus::Failed);
    }

    #[tokio::test]
    async fn task_of_another_deployment_is_not_found() {
        let f = fixture(false, Some("fake")).await;
        let err = f
            .runner
            .run_activity(&f.task_id, "other", "Compute", &Activity::delegate("install"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Task(TaskError::NotFound(_))));
    }

    #[tokio::test]
    async fn finish_from_created() {
        let f = fixture(false, Some("fake")).await;
        f.runner.finish(&f.task_id).unwrap();
        assert_eq!(f.runner.tasks().status(&f.task_id).unwrap(), TaskStatus::Done);
        assert!(matches!(
            f.runner.finish(&f.task_id),
            Err(WorkflowError::Task(TaskError::IllegalTransition { .. }))
        ));
        assert!(f.runner.tasks().store().deployment_exists("dep").unwrap());
    }

    #[tokio::test]
    async fn finished_purge_removes_topology() {
        let f = fixture(false, Some("fake")).await;
        f.runner.finish(&f.task_id).unwrap();
        let purge = f
            .runner
            .tasks()
            .register_task("dep", TaskType::Purge, TaskData::new())
            .await
            .unwrap();

        let task = f.runner.finish(&purge).unwrap();
        assert_eq!(task.status, TaskStatus::Done);
        assert!(!f.runner.tasks().store().deployment_exists("dep").unwrap());
        assert!(f.runner.tasks().store().node_instance_ids("dep", "Compute").unwrap().is_empty());
    }
}
