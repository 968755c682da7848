//! Planner composition (§4.3): pipeline → module → task, each producing an
//! `ExecutionFragment` by consulting the cluster spec and doing no I/O
//! against hosts. Modules and pipelines compose identically: merge required
//! children, link sequential ones by frontier, leave parallel siblings
//! unlinked.

use crate::context::EngineExecuteContext;
use crate::error::Result;
use crate::graph::{ExecutionFragment, ExecutionGraph};
use async_trait::async_trait;
use std::sync::Arc;

/// One task's planning contract. A task that is not required returns an
/// empty fragment and is skipped by its module.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    async fn is_required(&self, _ctx: &dyn EngineExecuteContext) -> Result<bool> {
        Ok(true)
    }

    async fn plan(&self, ctx: &dyn EngineExecuteContext) -> Result<ExecutionFragment>;

    /// Plans the task, collapsing "not required" into an empty fragment so
    /// callers never need to branch on `is_required` themselves.
    async fn plan_if_required(&self, ctx: &dyn EngineExecuteContext) -> Result<ExecutionFragment> {
        if self.is_required(ctx).await? {
            self.plan(ctx).await
        } else {
            Ok(ExecutionFragment::new_empty(self.name()))
        }
    }
}

/// A dispatcher task selects one concrete task variant at plan time (e.g.
/// container runtime = containerd | docker) and returns its fragment
/// verbatim, contributing no nodes of its own. Modeled as composition over
/// a selector closure rather than a base-class hierarchy.
pub struct DispatcherTask<F> {
    name: String,
    description: String,
    select: F,
}

impl<F> DispatcherTask<F>
where
    F: Fn(&dyn EngineExecuteContext) -> Result<Arc<dyn Task>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, select: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            select,
        }
    }
}

#[async_trait]
impl<F> Task for DispatcherTask<F>
where
    F: Fn(&dyn EngineExecuteContext) -> Result<Arc<dyn Task>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn is_required(&self, ctx: &dyn EngineExecuteContext) -> Result<bool> {
        (self.select)(ctx)?.is_required(ctx).await
    }

    async fn plan(&self, ctx: &dyn EngineExecuteContext) -> Result<ExecutionFragment> {
        (self.select)(ctx)?.plan(ctx).await
    }
}

/// A group of sibling tasks within a module: either a single task that must
/// run in sequence relative to neighbouring groups, or a batch of tasks that
/// run in parallel with each other (but still in sequence relative to
/// neighbouring groups).
pub enum TaskGroup {
    Sequential(Arc<dyn Task>),
    Parallel(Vec<Arc<dyn Task>>),
}

/// Composes an ordered list of task groups into one fragment: required
/// tasks within a group are merged without linking each other; each group's
/// frontier links to the previous non-empty group's frontier. Shared by
/// `Module::plan` and `Pipeline::plan`, which compose identically one level
/// up (modules and pipelines, respectively, in place of tasks).
async fn compose_groups<T, P>(
    name: &str,
    groups: &[T],
    ctx: &dyn EngineExecuteContext,
    plan_one: P,
) -> Result<ExecutionFragment>
where
    P: for<'a> Fn(&'a T, &'a dyn EngineExecuteContext) -> futures::future::BoxFuture<'a, Result<ExecutionFragment>>,
{
    let mut fragment = ExecutionFragment::new_empty(name);
    let mut prev_exit: Vec<String> = Vec::new();

    for group in groups {
        let mut sub = plan_one(group, ctx).await?;
        if sub.is_empty() {
            continue;
        }
        sub.calculate_entry_and_exit();
        let entry = sub.entry_nodes().to_vec();
        let exit = sub.exit_nodes().to_vec();

        fragment.merge(sub)?;
        if !prev_exit.is_empty() {
            fragment.link(&prev_exit, &entry)?;
        }
        prev_exit = exit;
    }

    fragment.calculate_entry_and_exit();
    Ok(fragment)
}

/// Composes tasks, in declared order, into one fragment.
pub struct Module {
    pub name: String,
    pub description: String,
    pub groups: Vec<TaskGroup>,
}

impl Module {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            groups: Vec::new(),
        }
    }

    pub fn then(mut self, task: Arc<dyn Task>) -> Self {
        self.groups.push(TaskGroup::Sequential(task));
        self
    }

    pub fn then_parallel(mut self, tasks: Vec<Arc<dyn Task>>) -> Self {
        self.groups.push(TaskGroup::Parallel(tasks));
        self
    }

    pub async fn plan(&self, ctx: &dyn EngineExecuteContext) -> Result<ExecutionFragment> {
        compose_groups(&self.name, &self.groups, ctx, |group, ctx| {
            Box::pin(async move {
                match group {
                    TaskGroup::Sequential(task) => task.plan_if_required(ctx).await,
                    TaskGroup::Parallel(tasks) => {
                        let mut merged = ExecutionFragment::new_empty("parallel-tasks");
                        for task in tasks {
                            let f = task.plan_if_required(ctx).await?;
                            if !f.is_empty() {
                                merged.merge(f)?;
                            }
                        }
                        Ok(merged)
                    }
                }
            })
        })
        .await
    }
}

/// A group of sibling modules within a pipeline, mirroring `TaskGroup` one
/// level up.
pub enum ModuleGroup {
    Sequential(Module),
    Parallel(Vec<Module>),
}

/// Composes modules, in declared order, into the final `ExecutionGraph`.
pub struct Pipeline {
    pub name: String,
    pub groups: Vec<ModuleGroup>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    pub fn then(mut self, module: Module) -> Self {
        self.groups.push(ModuleGroup::Sequential(module));
        self
    }

    pub fn then_parallel(mut self, modules: Vec<Module>) -> Self {
        self.groups.push(ModuleGroup::Parallel(modules));
        self
    }

    pub async fn plan(&self, ctx: &dyn EngineExecuteContext) -> Result<ExecutionGraph> {
        compose_groups(&self.name, &self.groups, ctx, |group, ctx| {
            Box::pin(async move {
                match group {
                    ModuleGroup::Sequential(module) => module.plan(ctx).await,
                    ModuleGroup::Parallel(modules) => {
                        let mut merged = ExecutionFragment::new_empty("parallel-modules");
                        for module in modules {
                            let f = module.plan(ctx).await?;
                            if !f.is_empty() {
                                merged.merge(f)?;
                            }
                        }
                        Ok(merged)
                    }
                }
            })
        })
        .await
    }
}
