//! Cluster lifecycle execution plane: plans a DAG of idempotent steps bound
//! to hosts, then runs it with bounded concurrency, skip-propagation on
//! failure, and a hierarchical scope cache shared across the planning and
//! execution stages.

pub mod cache;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod host;
pub mod planner;
pub mod result;
pub mod step;

pub use cache::{ScopeCache, ScopeDefaults};
pub use context::{
    Connector, ConnectorOutput, EngineExecuteContext, HostFacts, Logger, ResourceHandle, Runner,
    StepContext, TracingLogger,
};
pub use error::{EngineError, Result};
pub use executor::{DagExecutor, ExecutorConfig};
pub use graph::{ExecutionFragment, ExecutionGraph, ExecutionNode, NodeId};
pub use host::{Host, CONTROL_NODE_ROLE};
pub use planner::{DispatcherTask, Module, ModuleGroup, Pipeline, Task, TaskGroup};
pub use result::{GraphExecutionResult, HostResult, NodeResult, NodeStatus};
pub use step::{Step, StepMeta};
