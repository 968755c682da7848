//! Context plumbing (§4.5): the two context shapes planners and steps see,
//! plus the narrow collaborator traits the core consumes (§6). All
//! implementations are values threaded explicitly by the runtime, never
//! globals.

use crate::cache::ScopeCache;
use crate::error::Result;
use crate::graph::ExecutionFragment;
use crate::host::Host;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Structured logger, narrowed from the full collaborator described in §6:
/// `.with(k, v)` derives a child logger carrying an extra field, and the
/// level methods map onto whatever backend the caller wires up (the
/// crate's own `TracingLogger` maps them onto `tracing` macros).
pub trait Logger: Send + Sync {
    fn with(&self, key: &str, value: &str) -> Arc<dyn Logger>;
    fn debug(&self, msg: &str);
    fn info(&self, msg: &str);
    fn success(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
    fn fail(&self, msg: &str);
}

/// `tracing`-backed default implementation of the `Logger` collaborator.
/// Mirrors the teacher crate's use of `tracing::{info, warn, error}` bound
/// to structured fields (job/node/host ids) rather than free-form strings.
#[derive(Clone, Default)]
pub struct TracingLogger {
    fields: Vec<(String, String)>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    fn prefixed(&self, msg: &str) -> String {
        if self.fields.is_empty() {
            msg.to_string()
        } else {
            let ctx = self
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{ctx} {msg}")
        }
    }
}

impl Logger for TracingLogger {
    fn with(&self, key: &str, value: &str) -> Arc<dyn Logger> {
        let mut fields = self.fields.clone();
        fields.push((key.to_string(), value.to_string()));
        Arc::new(Self { fields })
    }

    fn debug(&self, msg: &str) {
        tracing::debug!("{}", self.prefixed(msg));
    }

    fn info(&self, msg: &str) {
        tracing::info!("{}", self.prefixed(msg));
    }

    fn success(&self, msg: &str) {
        tracing::info!(status = "success", "{}", self.prefixed(msg));
    }

    fn warn(&self, msg: &str) {
        tracing::warn!("{}", self.prefixed(msg));
    }

    fn error(&self, msg: &str) {
        tracing::error!("{}", self.prefixed(msg));
    }

    fn fail(&self, msg: &str) {
        // Never terminates the process from the core — see DESIGN.md.
        tracing::error!(status = "fail", "{}", self.prefixed(msg));
    }
}

/// Remote/local command execution and file transfer, consumed by steps
/// through `StepContext`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn exec(&self, cmd: &str, sudo: bool) -> Result<ConnectorOutput>;
    async fn download(&self, url: &str, dest: &Path, sudo: bool) -> Result<()>;
    async fn upload(&self, local: &Path, remote: &Path, mode: u32, sudo: bool) -> Result<()>;
    async fn mkdirp(&self, path: &Path, mode: u32, sudo: bool) -> Result<()>;
    async fn remove(&self, path: &Path, sudo: bool) -> Result<()>;
    async fn sha256(&self, path: &Path) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct ConnectorOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// OS facts and package/service helpers, consumed by steps through
/// `StepContext`.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn facts(&self, host: &Host) -> Result<HostFacts>;
    async fn install_package(&self, host: &Host, name: &str) -> Result<()>;
    async fn service_enable(&self, host: &Host, name: &str) -> Result<()>;
    async fn service_start(&self, host: &Host, name: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct HostFacts {
    pub os: String,
    pub arch: String,
    pub hostname: String,
}

/// A handle contributed by the resource-acquisition collaborator: it plans
/// its own download/extract sub-graph and exposes the cache key later steps
/// resolve for the resource's local path. Convention: `cache_key()` returns
/// `resource.<id>.downloaded_path`, stored in the task-scope cache so
/// sibling tasks needing the same artifact share one download.
#[async_trait]
pub trait ResourceHandle: Send + Sync {
    fn cache_key(&self) -> String;
    async fn ensure_plan(&self, ctx: &dyn EngineExecuteContext) -> Result<ExecutionFragment>;
}

/// Planning-time context: supplies the logger, cluster config accessors,
/// host selection, scope caches down to task granularity, and the factory
/// that narrows into a `StepContext` for execution.
pub trait EngineExecuteContext: Send + Sync {
    fn logger(&self) -> Arc<dyn Logger>;
    fn is_offline_mode(&self) -> bool;
    fn work_dir(&self) -> &Path;
    fn control_node(&self) -> &Host;
    fn hosts_by_role(&self, role: &str) -> Vec<Host>;
    fn pipeline_cache(&self) -> Arc<ScopeCache>;
    fn module_cache(&self) -> Arc<ScopeCache>;
    fn task_cache(&self) -> Arc<ScopeCache>;
    fn facts_cache(&self, host: &Host) -> Arc<ScopeCache>;
    fn runner(&self) -> Arc<dyn Runner>;
    fn connector_factory(&self, host: &Host) -> Arc<dyn Connector>;

    /// The plan's top-level cancellation token. Cancelling it (from outside,
    /// via the `Arc<dyn EngineExecuteContext>` the caller holds) propagates
    /// to every in-flight node and host operation: `for_host()` derives each
    /// `StepContext`'s token as a child of this one, so a single `.cancel()`
    /// here cancels the whole tree at once.
    fn cancellation(&self) -> CancellationToken;

    /// Narrows into a single host's execution-time view.
    fn for_host(&self, host: &Host) -> StepContext {
        let step_cache = ScopeCache::new_step(self.task_cache());
        StepContext {
            host: host.clone(),
            logger: self.logger().with("host", &host.name),
            runner: self.runner(),
            connector: self.connector_factory(host),
            step_cache,
            task_cache: self.task_cache(),
            module_cache: self.module_cache(),
            work_dir: self.work_dir().to_path_buf(),
            cancellation: self.cancellation().child_token(),
        }
    }
}

/// Execution-time context narrowed to one host.
#[derive(Clone)]
pub struct StepContext {
    pub host: Host,
    pub logger: Arc<dyn Logger>,
    pub runner: Arc<dyn Runner>,
    pub connector: Arc<dyn Connector>,
    pub step_cache: Arc<ScopeCache>,
    pub task_cache: Arc<ScopeCache>,
    pub module_cache: Arc<ScopeCache>,
    pub work_dir: PathBuf,
    pub cancellation: CancellationToken,
}

impl StepContext {
    /// Returns a copy bound to a new cancellation token (a child of the
    /// given one), analogous to `WithGoContext` in the source design.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancellation: token,
            ..self.clone()
        }
    }
}
