use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// The execution plane's single error type. Planning errors abort before any
/// step runs; step errors are recorded inside `NodeResult`/`HostResult` and
/// never bubble out of `DagExecutor::execute` as a top-level `Err` — only
/// setup failures (bad graph, no entry points, deadlock) do that.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("unknown node id: {0}")]
    UnknownNodeId(String),

    #[error("dependency graph has a cycle involving: {0}")]
    DagCycleDetected(String),

    #[error("graph has no entry nodes")]
    NoEntryNodes,

    #[error("scheduler made no progress: {0} nodes pending with nothing in flight")]
    Deadlock(usize),

    #[error("[CheckPhase] {0}")]
    Precheck(String),

    #[error("run failed: {0}")]
    Run(String),

    #[error("transport error: {message}")]
    Transport {
        message: String,
        stdout: Option<String>,
        stderr: Option<String>,
    },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("type mismatch for cache key '{key}': expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn configuration<E: std::fmt::Display>(e: E) -> Self {
        Self::Configuration(e.to_string())
    }

    /// Command output attached to the error, when the failing step surfaced
    /// it (e.g. a connector exec failure). Used by the executor to populate
    /// `HostResult::{stdout,stderr}`.
    pub fn command_output(&self) -> (Option<String>, Option<String>) {
        match self {
            Self::Transport { stdout, stderr, .. } => (stdout.clone(), stderr.clone()),
            _ => (None, None),
        }
    }
}
