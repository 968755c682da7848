//! End-to-end test composing the planner and executor together, the way a
//! concrete cluster-bring-up pipeline would: a dispatcher task picks a
//! container runtime variant, a module runs download -> install -> enable
//! sequentially, and a second module installs an add-on on worker hosts in
//! parallel with a control-node-only task.

use async_trait::async_trait;
use cluster_engine::{
    Connector, ConnectorOutput, DagExecutor, DispatcherTask, EngineExecuteContext,
    ExecutionFragment, ExecutionNode, ExecutorConfig, Host, HostFacts, Logger, Module, NodeStatus,
    Pipeline, Result, Runner, ScopeCache, Step, StepContext, StepMeta, Task, TracingLogger,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct RecordingStep {
    meta: StepMeta,
    run_calls: Arc<AtomicUsize>,
}

impl RecordingStep {
    fn new(name: impl Into<String>, run_calls: Arc<AtomicUsize>) -> Self {
        Self {
            meta: StepMeta::new(name, "records its own invocation"),
            run_calls,
        }
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn meta(&self) -> &StepMeta {
        &self.meta
    }
    async fn precheck(&self, _ctx: &StepContext, _host: &Host) -> Result<bool> {
        Ok(false)
    }
    async fn run(&self, _ctx: &StepContext, _host: &Host) -> Result<()> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SingleStepTask {
    name: String,
    hosts_role: Option<String>,
    run_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for SingleStepTask {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "runs one recording step"
    }
    async fn plan(&self, ctx: &dyn EngineExecuteContext) -> Result<ExecutionFragment> {
        let hosts = match &self.hosts_role {
            Some(role) => ctx.hosts_by_role(role),
            None => vec![ctx.control_node().clone()],
        };
        let mut frag = ExecutionFragment::new_empty(&self.name);
        let node = ExecutionNode::new(
            &self.name,
            Arc::new(RecordingStep::new(&self.name, self.run_calls.clone())),
            hosts,
        );
        frag.add_node(node)?;
        frag.calculate_entry_and_exit();
        Ok(frag)
    }
}

/// A container-runtime variant: plans its own internal download -> install
/// -> enable chain, the way a dispatcher-selected task would.
struct ContainerdTask {
    download_calls: Arc<AtomicUsize>,
    install_calls: Arc<AtomicUsize>,
    enable_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for ContainerdTask {
    fn name(&self) -> &str {
        "containerd"
    }
    fn description(&self) -> &str {
        "installs and enables containerd on master hosts"
    }
    async fn plan(&self, ctx: &dyn EngineExecuteContext) -> Result<ExecutionFragment> {
        let masters = ctx.hosts_by_role("master");
        let mut frag = ExecutionFragment::new_empty("containerd");

        let download = frag.add_node(ExecutionNode::new(
            "containerd-download",
            Arc::new(RecordingStep::new("containerd-download", self.download_calls.clone())),
            vec![ctx.control_node().clone()],
        ))?;
        let install = frag.add_node(ExecutionNode::new(
            "containerd-install",
            Arc::new(RecordingStep::new("containerd-install", self.install_calls.clone())),
            masters.clone(),
        ))?;
        let enable = frag.add_node(ExecutionNode::new(
            "containerd-enable",
            Arc::new(RecordingStep::new("containerd-enable", self.enable_calls.clone())),
            masters,
        ))?;

        frag.add_dependency(&download, &install)?;
        frag.add_dependency(&install, &enable)?;
        frag.calculate_entry_and_exit();
        Ok(frag)
    }
}

struct NoopConnector;

#[async_trait]
impl Connector for NoopConnector {
    async fn exec(&self, _cmd: &str, _sudo: bool) -> Result<ConnectorOutput> {
        Ok(ConnectorOutput::default())
    }
    async fn download(&self, _url: &str, _dest: &Path, _sudo: bool) -> Result<()> {
        Ok(())
    }
    async fn upload(&self, _local: &Path, _remote: &Path, _mode: u32, _sudo: bool) -> Result<()> {
        Ok(())
    }
    async fn mkdirp(&self, _path: &Path, _mode: u32, _sudo: bool) -> Result<()> {
        Ok(())
    }
    async fn remove(&self, _path: &Path, _sudo: bool) -> Result<()> {
        Ok(())
    }
    async fn sha256(&self, _path: &Path) -> Result<String> {
        Ok("deadbeef".to_string())
    }
}

struct NoopRunner;

#[async_trait]
impl Runner for NoopRunner {
    async fn facts(&self, _host: &Host) -> Result<HostFacts> {
        Ok(HostFacts::default())
    }
    async fn install_package(&self, _host: &Host, _name: &str) -> Result<()> {
        Ok(())
    }
    async fn service_enable(&self, _host: &Host, _name: &str) -> Result<()> {
        Ok(())
    }
    async fn service_start(&self, _host: &Host, _name: &str) -> Result<()> {
        Ok(())
    }
}

struct ClusterContext {
    hosts: Vec<Host>,
    control: Host,
    work_dir: std::path::PathBuf,
    pipeline_cache: Arc<ScopeCache>,
    module_cache: Arc<ScopeCache>,
    task_cache: Arc<ScopeCache>,
    cancellation: tokio_util::sync::CancellationToken,
}

impl ClusterContext {
    fn new(hosts: Vec<Host>) -> Self {
        let pipeline_cache = ScopeCache::new_pipeline();
        let module_cache = ScopeCache::new_module(pipeline_cache.clone());
        let task_cache = ScopeCache::new_task(module_cache.clone());
        Self {
            hosts,
            control: Host::control_node(),
            work_dir: std::env::temp_dir(),
            pipeline_cache,
            module_cache,
            task_cache,
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }
}

impl EngineExecuteContext for ClusterContext {
    fn logger(&self) -> Arc<dyn Logger> {
        Arc::new(TracingLogger::new())
    }
    fn is_offline_mode(&self) -> bool {
        false
    }
    fn work_dir(&self) -> &Path {
        &self.work_dir
    }
    fn control_node(&self) -> &Host {
        &self.control
    }
    fn hosts_by_role(&self, role: &str) -> Vec<Host> {
        self.hosts.iter().filter(|h| h.has_role(role)).cloned().collect()
    }
    fn pipeline_cache(&self) -> Arc<ScopeCache> {
        self.pipeline_cache.clone()
    }
    fn module_cache(&self) -> Arc<ScopeCache> {
        self.module_cache.clone()
    }
    fn task_cache(&self) -> Arc<ScopeCache> {
        self.task_cache.clone()
    }
    fn facts_cache(&self, _host: &Host) -> Arc<ScopeCache> {
        ScopeCache::new_task(self.task_cache.clone())
    }
    fn runner(&self) -> Arc<dyn Runner> {
        Arc::new(NoopRunner)
    }
    fn connector_factory(&self, _host: &Host) -> Arc<dyn Connector> {
        Arc::new(NoopConnector)
    }
    fn cancellation(&self) -> tokio_util::sync::CancellationToken {
        self.cancellation.clone()
    }
}

#[tokio::test]
async fn pipeline_plans_and_executes_a_full_cluster_bring_up() {
    let hosts = vec![
        Host::new("master-1", "10.0.0.1", "root", 22).with_roles(["master"]),
        Host::new("worker-1", "10.0.0.2", "root", 22).with_roles(["worker"]),
        Host::new("worker-2", "10.0.0.3", "root", 22).with_roles(["worker"]),
    ];
    let ctx = Arc::new(ClusterContext::new(hosts));

    let download_calls = Arc::new(AtomicUsize::new(0));
    let install_calls = Arc::new(AtomicUsize::new(0));
    let enable_calls = Arc::new(AtomicUsize::new(0));
    let addon_calls = Arc::new(AtomicUsize::new(0));
    let banner_calls = Arc::new(AtomicUsize::new(0));

    let runtime_dispatcher = DispatcherTask::new(
        "container-runtime",
        "selects the configured container runtime",
        {
            let download_calls = download_calls.clone();
            let install_calls = install_calls.clone();
            let enable_calls = enable_calls.clone();
            move |_ctx: &dyn EngineExecuteContext| {
                Ok(Arc::new(ContainerdTask {
                    download_calls: download_calls.clone(),
                    install_calls: install_calls.clone(),
                    enable_calls: enable_calls.clone(),
                }) as Arc<dyn Task>)
            }
        },
    );

    let runtime_module = Module::new("container-runtime", "installs the container runtime")
        .then(Arc::new(runtime_dispatcher));

    let addon_module = Module::new("addons", "installs cluster add-ons").then_parallel(vec![
        Arc::new(SingleStepTask {
            name: "addon-on-workers".to_string(),
            hosts_role: Some("worker".to_string()),
            run_calls: addon_calls.clone(),
        }),
        Arc::new(SingleStepTask {
            name: "greeting-banner".to_string(),
            hosts_role: None,
            run_calls: banner_calls.clone(),
        }),
    ]);

    let pipeline = Pipeline::new("cluster-bring-up")
        .then(runtime_module)
        .then(addon_module);

    let graph = pipeline.plan(ctx.as_ref()).await.unwrap();
    assert_eq!(graph.len(), 5);

    let executor = DagExecutor::new(ExecutorConfig::default());
    let result = executor.execute(ctx.clone(), graph, false).await.unwrap();

    assert_eq!(result.status, NodeStatus::Success);
    assert_eq!(download_calls.load(Ordering::SeqCst), 1);
    assert_eq!(install_calls.load(Ordering::SeqCst), 1);
    assert_eq!(enable_calls.load(Ordering::SeqCst), 1);
    assert_eq!(addon_calls.load(Ordering::SeqCst), 2); // fanned out to both workers
    assert_eq!(banner_calls.load(Ordering::SeqCst), 1); // control node only

    let addon_node = result
        .node_results
        .values()
        .find(|n| n.step_name == "addon-on-workers")
        .unwrap();
    assert_eq!(addon_node.host_results.len(), 2);
    assert!(addon_node.host_results.contains_key("worker-1"));
    assert!(addon_node.host_results.contains_key("worker-2"));
}

#[tokio::test]
async fn dry_run_plans_the_same_graph_but_touches_no_step() {
    let hosts = vec![Host::new("master-1", "10.0.0.1", "root", 22).with_roles(["master"])];
    let ctx = Arc::new(ClusterContext::new(hosts));
    let run_calls = Arc::new(AtomicUsize::new(0));

    let module = Module::new("m", "").then(Arc::new(SingleStepTask {
        name: "install".to_string(),
        hosts_role: Some("master".to_string()),
        run_calls: run_calls.clone(),
    }));
    let pipeline = Pipeline::new("p").then(module);
    let graph = pipeline.plan(ctx.as_ref()).await.unwrap();

    let executor = DagExecutor::new(ExecutorConfig::default());
    let result = executor.execute(ctx.clone(), graph, true).await.unwrap();

    assert_eq!(result.status, NodeStatus::Success);
    assert!(result
        .node_results
        .values()
        .all(|n| n.status == NodeStatus::Skipped));
    assert_eq!(run_calls.load(Ordering::SeqCst), 0);
}
