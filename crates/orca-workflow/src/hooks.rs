//! Post-activity hooks.
//!
//! A [`HookRegistry`] is assembled once during startup and shared behind an
//! `Arc`; it has no mutation API after [`HookRegistryBuilder::build`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::{debug, warn};

use orca_core::Configuration;
use orca_state::{StateStore, keys};
use orca_tasks::{Task, TaskStatus};

use crate::activity::{Activity, ActivityType};

/// Where a finished activity ran.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub store: StateStore,
    pub config: Arc<Configuration>,
    pub task_id: String,
    pub deployment_id: String,
    /// Node the activity targeted.
    pub target: String,
}

impl HookContext {
    /// Status of the owning task.
    pub fn task_status(&self) -> anyhow::Result<TaskStatus> {
        let task: Task = self
            .store
            .get_json(&keys::task(&self.task_id))?
            .ok_or_else(|| anyhow::anyhow!("task {:?} not found", self.task_id))?;
        Ok(task.status)
    }
}

/// Callback run after a workflow activity completes.
pub trait ActivityHook: Send + Sync {
    fn name(&self) -> &str;

    /// Activity kinds this hook runs after.
    fn handles(&self, kind: ActivityType) -> bool {
        matches!(kind, ActivityType::Delegate | ActivityType::CallOperation)
    }

    fn after_activity(&self, ctx: &HookContext, activity: &Activity) -> anyhow::Result<()>;
}

/// Adapts a closure into an [`ActivityHook`] with the default activity filter.
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&HookContext, &Activity) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ActivityHook for FnHook<F>
where
    F: Fn(&HookContext, &Activity) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn after_activity(&self, ctx: &HookContext, activity: &Activity) -> anyhow::Result<()> {
        (self.f)(ctx, activity)
    }
}

/// Result of one [`HookRegistry::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookReport {
    /// Hooks that matched the activity kind and were called.
    pub invoked: usize,
    /// Names of the hooks that failed or panicked.
    pub failed: Vec<String>,
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn ActivityHook>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct HookRegistryBuilder {
    hooks: Vec<Arc<dyn ActivityHook>>,
}

impl HookRegistryBuilder {
    pub fn register(mut self, hook: impl ActivityHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn register_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&HookContext, &Activity) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(FnHook::new(name, f))
    }

    pub fn build(self) -> HookRegistry {
        HookRegistry { hooks: self.hooks }
    }
}

impl HookRegistry {
    pub fn builder() -> HookRegistryBuilder {
        HookRegistryBuilder::default()
    }

    /// Registry without hooks.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hook names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Call every hook handling `activity.kind`, in registration order.
    ///
    /// Errors and panics are logged per hook and never interrupt the others.
    pub fn run(&self, ctx: &HookContext, activity: &Activity) -> HookReport {
        let mut report = HookReport::default();
        for hook in &self.hooks {
            if !hook.handles(activity.kind) {
                continue;
            }
            report.invoked += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| hook.after_activity(ctx, activity)));
            match outcome {
                Ok(Ok(())) => {
                    debug!(hook = hook.name(), task = %ctx.task_id, node = %ctx.target, "hook completed");
                }
                Ok(Err(e)) => {
                    warn!(
                        hook = hook.name(),
                        deployment = %ctx.deployment_id,
                        task = %ctx.task_id,
                        node = %ctx.target,
                        error = %e,
                        "post-activity hook failed"
                    );
                    report.failed.push(hook.name().to_string());
                }
                Err(_) => {
                    warn!(
                        hook = hook.name(),
                        deployment = %ctx.deployment_id,
                        task = %ctx.task_id,
                        node = %ctx.target,
                        "post-activity hook panicked"
                    );
                    report.failed.push(hook.name().to_string());
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn context() -> HookContext {
        HookContext {
            store: StateStore::open_in_memory().unwrap(),
            config: Arc::new(Configuration::default()),
            task_id: "t1".to_string(),
            deployment_id: "dep".to_string(),
            target: "Compute".to_string(),
        }
    }

    fn recorder(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> impl ActivityHook {
        FnHook::new(name, move |_ctx: &HookContext, _activity: &Activity| {
            log.lock().unwrap().push(name.to_string());
            Ok(())
        })
    }

    #[test]
    fn runs_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::builder()
            .register(recorder(log.clone(), "first"))
            .register(recorder(log.clone(), "second"))
            .register(recorder(log.clone(), "third"))
            .build();

        let report = registry.run(&context(), &Activity::delegate("install"));
        assert_eq!(report.invoked, 3);
        assert!(report.failed.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(registry.names(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failures_and_panics_are_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::builder()
            .register_fn("failing", |_, _| anyhow::bail!("store unreachable"))
            .register_fn("panicking", |_, _| panic!("hook bug"))
            .register(recorder(log.clone(), "last"))
            .build();

        let report = registry.run(&context(), &Activity::call_operation("Standard.start"));
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, vec!["failing".to_string(), "panicking".to_string()]);
        assert_eq!(*log.lock().unwrap(), vec!["last"]);
    }

    #[test]
    fn other_activity_kinds_are_ignored_by_default() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = HookRegistry::builder()
            .register(recorder(log.clone(), "only"))
            .build();

        let ctx = context();
        assert_eq!(registry.run(&ctx, &Activity::set_state("started")).invoked, 0);
        assert_eq!(registry.run(&ctx, &Activity::inline("install")).invoked, 0);
        assert!(log.lock().unwrap().is_empty());
    }

    struct EveryKind;

    impl ActivityHook for EveryKind {
        fn name(&self) -> &str {
            "every-kind"
        }

        fn handles(&self, _kind: ActivityType) -> bool {
            true
        }

        fn after_activity(&self, _ctx: &HookContext, _activity: &Activity) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn hooks_may_widen_the_filter() {
        let registry = HookRegistry::builder().register(EveryKind).build();
        let report = registry.run(&context(), &Activity::set_state("started"));
        assert_eq!(report.invoked, 1);
    }

    #[test]
    fn empty_registry() {
        let registry = HookRegistry::empty();
        assert!(registry.is_empty());
        assert_eq!(
            registry.run(&context(), &Activity::delegate("install")),
            HookReport::default()
        );
    }
}
