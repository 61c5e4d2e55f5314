//! TaskRegistry: creates tasks under the deployment lock and drives their
//! status.
//!
//! Registration is serialized per deployment by the store-backed lease lock,
//! so two orchestrator processes sharing a store cannot both register
//! conflicting tasks. Status writes go through [`StateStore::update`], which
//! reads and writes in one serializable transaction.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use orca_state::{KvOp, LockOptions, StateStore, keys};

use crate::error::{TaskError, TaskResult};
use crate::types::{Task, TaskData, TaskStatus, TaskType, validate_data};

#[derive(Debug, Clone)]
pub struct TaskRegistry {
    store: StateStore,
    lock_options: LockOptions,
    /// Recorded in lock leases for diagnostics.
    holder: String,
}

impl TaskRegistry {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            lock_options: LockOptions::default(),
            holder: format!("orca-{}", std::process::id()),
        }
    }

    pub fn with_lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Register a task carrying `data`. Returns the new task id.
    pub async fn register_task(
        &self,
        deployment_id: &str,
        task_type: TaskType,
        data: TaskData,
    ) -> TaskResult<String> {
        let (task_id, ()) = self
            .register_task_with(deployment_id, task_type, |_| Ok::<_, TaskError>((data, ())))
            .await?;
        Ok(task_id)
    }

    /// Register a task after running `mutate` under the same lock hold.
    ///
    /// Sequence: acquire the deployment lock, reject if a conflicting task is
    /// live, run `mutate` (which returns the task data and a value for the
    /// caller), validate the data, persist the task as `CREATED`, release.
    /// The lock is released on every path, including errors from `mutate`.
    /// Writes already performed by `mutate` are not rolled back if it or the
    /// data validation fails.
    pub async fn register_task_with<F, T, E>(
        &self,
        deployment_id: &str,
        task_type: TaskType,
        mutate: F,
    ) -> Result<(String, T), E>
    where
        F: FnOnce(&StateStore) -> Result<(TaskData, T), E>,
        E: From<TaskError>,
    {
        let guard = self
            .store
            .acquire_lock(
                &keys::deployment_lock(deployment_id),
                &self.holder,
                &self.lock_options,
            )
            .await
            .map_err(TaskError::from)?;

        if let Some(existing) = self.live_conflicting_task(deployment_id, task_type)? {
            debug!(
                deployment = %deployment_id,
                existing = %existing.id,
                requested = %task_type,
                "task registration rejected"
            );
            return Err(TaskError::Conflict {
                deployment_id: deployment_id.to_string(),
                task_id: existing.id,
                task_type: existing.task_type,
            }
            .into());
        }

        let (data, value) = mutate(&self.store)?;
        validate_data(task_type, &data)?;

        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: deployment_id.to_string(),
            task_type,
            status: TaskStatus::Created,
            data,
            created_at: epoch_secs(),
        };
        let record = serde_json::to_string(&task)
            .map_err(|e| TaskError::from(orca_state::StateError::Serialize(e.to_string())))?;
        self.store
            .apply(&[
                KvOp::put(keys::task(&task.id), record),
                KvOp::put(
                    keys::deployment_task(deployment_id, &task.id),
                    task_type.to_string(),
                ),
            ])
            .map_err(TaskError::from)?;

        if let Err(e) = guard.release() {
            warn!(deployment = %deployment_id, error = %e, "failed to release deployment lock");
        }

        info!(deployment = %deployment_id, task = %task.id, task_type = %task_type, "task registered");
        Ok((task.id, value))
    }

    /// Load a task by id.
    pub fn get(&self, task_id: &str) -> TaskResult<Task> {
        self.store
            .get_json(&keys::task(task_id))?
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    pub fn status(&self, task_id: &str) -> TaskResult<TaskStatus> {
        Ok(self.get(task_id)?.status)
    }

    /// Move a task to `next`, atomically with respect to other status writers.
    ///
    /// Fails with [`TaskError::IllegalTransition`] when the task is terminal
    /// or `next` is not reachable from the current status.
    pub fn set_status(&self, task_id: &str, next: TaskStatus) -> TaskResult<Task> {
        let key = keys::task(task_id);
        let stored = self.store.update(&key, |current| -> TaskResult<String> {
            let current = current.ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
            let mut task: Task = serde_json::from_str(current)
                .map_err(|e| orca_state::StateError::Deserialize(e.to_string()))?;
            if !task.status.can_transition_to(next) {
                return Err(TaskError::IllegalTransition {
                    from: task.status,
                    to: next,
                });
            }
            task.status = next;
            let next_record = serde_json::to_string(&task)
                .map_err(|e| orca_state::StateError::Serialize(e.to_string()))?;
            Ok(next_record)
        })?;
        let task: Task = serde_json::from_str(&stored)
            .map_err(|e| orca_state::StateError::Deserialize(e.to_string()))?;
        debug!(deployment = %task.target_id, task = %task_id, status = %next, "task status updated");
        Ok(task)
    }

    /// Mark a task `CANCELED`. Executors and hooks observe this and stop.
    pub fn cancel(&self, task_id: &str) -> TaskResult<Task> {
        let task = self.set_status(task_id, TaskStatus::Canceled)?;
        info!(deployment = %task.target_id, task = %task_id, "task canceled");
        Ok(task)
    }

    /// All tasks of a deployment, oldest first.
    pub fn list_for_deployment(&self, deployment_id: &str) -> TaskResult<Vec<Task>> {
        let prefix = keys::deployment_tasks(deployment_id);
        let mut tasks = Vec::new();
        for key in self.store.list_keys(&prefix)? {
            let Some(task_id) = key.strip_prefix(&prefix) else {
                continue;
            };
            match self.store.get_json::<Task>(&keys::task(task_id))? {
                Some(task) => tasks.push(task),
                None => warn!(deployment = %deployment_id, task = %task_id, "dangling task index entry"),
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// A live task on the deployment that forbids registering `task_type`.
    pub fn live_conflicting_task(
        &self,
        deployment_id: &str,
        task_type: TaskType,
    ) -> TaskResult<Option<Task>> {
        Ok(self
            .list_for_deployment(deployment_id)?
            .into_iter()
            .find(|t| t.is_live() && t.task_type.conflicts_with(task_type)))
    }

    /// Delete a terminal task and its index entry.
    pub fn delete(&self, task_id: &str) -> TaskResult<()> {
        let task = self.get(task_id)?;
        if task.is_live() {
            return Err(TaskError::Validation(format!(
                "task {task_id:?} is still {}",
                task.status
            )));
        }
        self.store.apply(&[
            KvOp::Delete {
                key: keys::task(task_id),
            },
            KvOp::Delete {
                key: keys::deployment_task(&task.target_id, task_id),
            },
        ])?;
        debug!(deployment = %task.target_id, task = %task_id, "task deleted");
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> TaskRegistry {
        let store = StateStore::open_in_memory().unwrap();
        TaskRegistry::new(store).with_lock_options(LockOptions {
            ttl: Duration::from_secs(30),
            wait_timeout: Duration::from_millis(200),
            retry_interval: Duration::from_millis(10),
        })
    }

    fn command_data() -> TaskData {
        TaskData::from([
            ("node".to_string(), "Compute".to_string()),
            ("commandName".to_string(), "restart".to_string()),
        ])
    }

    #[tokio::test]
    async fn registered_task_starts_created() {
        let registry = registry();
        let id = registry
            .register_task("dep", TaskType::Deploy, TaskData::new())
            .await
            .unwrap();

        let task = registry.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.target_id, "dep");
        assert_eq!(task.task_type, TaskType::Deploy);
        assert_eq!(registry.list_for_deployment("dep").unwrap().len(), 1);
        assert!(registry.list_for_deployment("other").unwrap().is_empty());
    }

    #[tokio::test]
    async fn conflicting_task_is_rejected_until_terminal() {
        let registry = registry();
        let first = registry
            .register_task("dep", TaskType::Deploy, TaskData::new())
            .await
            .unwrap();

        let err = registry
            .register_task("dep", TaskType::Undeploy, TaskData::new())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        match err {
            TaskError::Conflict { task_id, .. } => assert_eq!(task_id, first),
            other => panic!("unexpected error: {other}"),
        }

        registry.set_status(&first, TaskStatus::Running).unwrap();
        registry.set_status(&first, TaskStatus::Done).unwrap();
        registry
            .register_task("dep", TaskType::Undeploy, TaskData::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn other_deployments_are_independent() {
        let registry = registry();
        registry
            .register_task("a", TaskType::Deploy, TaskData::new())
            .await
            .unwrap();
        registry
            .register_task("b", TaskType::Deploy, TaskData::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn custom_command_runs_alongside_scaling() {
        let registry = registry();
        let data = TaskData::from([
            ("node".to_string(), "Compute".to_string()),
            ("new_instances_ids".to_string(), "1".to_string()),
            ("current_instances_number".to_string(), "2".to_string()),
            ("req".to_string(), String::new()),
        ]);
        registry
            .register_task("dep", TaskType::ScaleUp, data)
            .await
            .unwrap();
        registry
            .register_task("dep", TaskType::CustomCommand, command_data())
            .await
            .unwrap();
        registry
            .register_task("dep", TaskType::CustomCommand, command_data())
            .await
            .unwrap();

        let err = registry
            .register_task("dep", TaskType::Purge, TaskData::new())
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn invalid_data_is_rejected() {
        let registry = registry();
        let err = registry
            .register_task("dep", TaskType::CustomCommand, TaskData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        assert!(registry.list_for_deployment("dep").unwrap().is_empty());
    }

    #[tokio::test]
    async fn mutation_is_skipped_on_conflict() {
        let registry = registry();
        registry
            .register_task("dep", TaskType::Deploy, TaskData::new())
            .await
            .unwrap();

        let mut ran = false;
        let result: Result<(String, ()), TaskError> = registry
            .register_task_with("dep", TaskType::Undeploy, |_| {
                ran = true;
                Ok((TaskData::new(), ()))
            })
            .await;
        assert!(result.unwrap_err().is_conflict());
        assert!(!ran);
    }

    #[tokio::test]
    async fn lock_is_released_when_mutation_fails() {
        let registry = registry();
        let result: Result<(String, ()), TaskError> = registry
            .register_task_with("dep", TaskType::Deploy, |_| {
                Err(TaskError::Validation("boom".to_string()))
            })
            .await;
        assert!(matches!(result, Err(TaskError::Validation(_))));
        assert!(
            registry
                .store()
                .lock_record(&keys::deployment_lock("dep"))
                .unwrap()
                .is_none()
        );

        // Nothing was registered and the next caller is not blocked.
        registry
            .register_task("dep", TaskType::Deploy, TaskData::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn mutation_sees_store_and_returns_value() {
        let registry = registry();
        let (id, written) = registry
            .register_task_with("dep", TaskType::Deploy, |store| {
                store.put("marker", "1")?;
                Ok::<_, TaskError>((TaskData::new(), 7u32))
            })
            .await
            .unwrap();
        assert_eq!(written, 7);
        assert_eq!(registry.store().get("marker").unwrap().as_deref(), Some("1"));
        assert_eq!(registry.status(&id).unwrap(), TaskStatus::Created);
    }

    #[tokio::test]
    async fn busy_lock_surfaces_retryable_error() {
        let registry = registry();
        let _held = registry
            .store()
            .try_acquire_lock(&keys::deployment_lock("dep"), "other", Duration::from_secs(30))
            .unwrap()
            .unwrap();

        let err = registry
            .register_task("dep", TaskType::Deploy, TaskData::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!err.is_conflict());
    }

    #[tokio::test]
    async fn concurrent_registrations_admit_one() {
        let registry = registry().with_lock_options(LockOptions {
            ttl: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(5),
        });

        let mut handles = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register_task("dep", TaskType::Deploy, TaskData::new())
                    .await
            }));
        }

        let mut admitted = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(e) if e.is_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(conflicts, 3);
    }

    #[tokio::test]
    async fn status_transitions_are_checked() {
        let registry = registry();
        let id = registry
            .register_task("dep", TaskType::Deploy, TaskData::new())
            .await
            .unwrap();

        let err = registry.set_status(&id, TaskStatus::Done).unwrap_err();
        assert!(matches!(
            err,
            TaskError::IllegalTransition {
                from: TaskStatus::Created,
                to: TaskStatus::Done
            }
        ));

        registry.set_status(&id, TaskStatus::Running).unwrap();
        registry.set_status(&id, TaskStatus::Running).unwrap();
        registry.cancel(&id).unwrap();
        assert_eq!(registry.status(&id).unwrap(), TaskStatus::Canceled);

        assert!(matches!(
            registry.set_status(&id, TaskStatus::Running),
            Err(TaskError::IllegalTransition { .. })
        ));
        assert_eq!(registry.status(&id).unwrap(), TaskStatus::Canceled);
    }

    #[test]
    fn unknown_task_is_not_found() {
        let registry = registry();
        assert!(matches!(registry.get("nope"), Err(TaskError::NotFound(_))));
        assert!(matches!(
            registry.set_status("nope", TaskStatus::Running),
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn only_terminal_tasks_are_deleted() {
        let registry = registry();
        let id = registry
            .register_task("dep", TaskType::Deploy, TaskData::new())
            .await
            .unwrap();
        assert!(matches!(
            registry.delete(&id),
            Err(TaskError::Validation(_))
        ));

        registry.set_status(&id, TaskStatus::Failed).unwrap();
        registry.delete(&id).unwrap();
        assert!(matches!(registry.get(&id), Err(TaskError::NotFound(_))));
        assert!(registry.list_for_deployment("dep").unwrap().is_empty());
    }
}
