//! The DAG executor (§4.4): a bounded-concurrency scheduler that runs nodes
//! once all dependencies complete, fans out per node to all target hosts
//! with precheck/run/rollback, propagates skip on failure, and aggregates
//! results. The ready queue has a single owner (this loop); worker tasks
//! never touch scheduler state directly — they report completion over a
//! channel, matching the source design's "avoid sharing the queue across
//! workers" guidance.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::context::{EngineExecuteContext, StepContext};
use crate::error::{EngineError, Result};
use crate::graph::{ExecutionGraph, ExecutionNode, NodeId};
use crate::host::Host;
use crate::result::{GraphExecutionResult, HostResult, NodeResult, NodeStatus};
use crate::step::Step;

/// Tunables for the scheduler loop, sized the way the teacher crate sizes
/// `StageConfig` (a sensible default plus full override).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bounded concurrency limit: max nodes in flight at once.
    pub max_workers: usize,
    /// Upper bound on how long the scheduler loop waits for the next
    /// completion before re-checking for deadlock (§5: "bounded (≤50ms)").
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            poll_interval: Duration::from_millis(50),
        }
    }
}

pub struct DagExecutor {
    config: ExecutorConfig,
}

impl Default for DagExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

/// Outcome of running one node's full host fan-out, reported back to the
/// scheduler loop over a channel.
struct NodeOutcome {
    id: NodeId,
    status: NodeStatus,
    message: String,
    host_results: HashMap<String, HostResult>,
}

impl DagExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub async fn execute(
        &self,
        ctx: Arc<dyn EngineExecuteContext>,
        graph: ExecutionGraph,
        dry_run: bool,
    ) -> Result<GraphExecutionResult> {
        let start_time = Utc::now();

        if dry_run {
            return Ok(Self::dry_run_result(&graph, start_time));
        }

        graph.validate()?;
        if !graph.is_empty() && graph.entry_nodes().is_empty() {
            return Err(EngineError::NoEntryNodes);
        }

        let total = graph.len();
        if total == 0 {
            return Ok(GraphExecutionResult {
                name: graph.name.clone(),
                status: NodeStatus::Success,
                start_time,
                end_time: Utc::now(),
                node_results: HashMap::new(),
            });
        }

        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut results: HashMap<NodeId, NodeResult> = HashMap::new();

        for node in graph.nodes().values() {
            in_degree.insert(node.id.clone(), node.dependencies.len());
            dependents.entry(node.id.clone()).or_default();
            for dep in &node.dependencies {
                dependents.entry(dep.clone()).or_default().push(node.id.clone());
            }
            results.insert(
                node.id.clone(),
                NodeResult::pending(node.name.clone(), node.step_name.clone()),
            );
        }

        let mut ready: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();

        let (tx, mut rx) = mpsc::unbounded_channel::<NodeOutcome>();
        let mut processed = 0usize;
        let mut in_flight = 0usize;
        let cancel = ctx.cancellation();

        loop {
            // A tripped engine-wide token stops scheduling immediately: no
            // further ready nodes are dequeued, and every node still Pending
            // or Running is reported Failed with the cancellation cause.
            // Nodes already spawned keep running in the background — they
            // hold a child of `cancel` via `for_host()` and are expected to
            // observe it and return promptly, same as the teacher's own
            // per-stage cancellation propagation.
            if cancel.is_cancelled() {
                mark_cancelled(&mut results);
                break;
            }

            // Launch as many ready nodes as the concurrency bound allows.
            while in_flight < self.config.max_workers {
                let Some(id) = ready.pop_front() else { break };
                let node = graph.node(&id).expect("ready node must exist in graph").clone();
                if let Some(r) = results.get_mut(&id) {
                    r.status = NodeStatus::Running;
                    r.start_time = Utc::now();
                }
                in_flight += 1;
                spawn_node(node, ctx.clone(), cancel.clone(), tx.clone());
            }

            if processed >= total {
                break;
            }

            if in_flight == 0 && ready.is_empty() {
                error!("DAG executor deadlock: {} nodes pending, nothing in flight", total - processed);
                return Err(EngineError::Deadlock(total - processed));
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    mark_cancelled(&mut results);
                    break;
                }
                recvd = tokio::time::timeout(self.config.poll_interval, rx.recv()) => {
                    match recvd {
                        Ok(Some(outcome)) => outcome,
                        Ok(None) => {
                            error!("DAG executor: completion channel closed unexpectedly");
                            return Err(EngineError::Deadlock(total - processed));
                        }
                        Err(_) => continue, // bounded poll timeout; loop back and re-check
                    }
                }
            };

            in_flight -= 1;
            processed += 1;

            let failed = outcome.status == NodeStatus::Failed;
            if let Some(r) = results.get_mut(&outcome.id) {
                r.status = outcome.status;
                r.message = outcome.message;
                r.host_results = outcome.host_results;
                r.end_time = Utc::now();
            }

            if failed {
                warn!(node = %outcome.id, "node failed, propagating skip to dependents");
                processed += propagate_skip(&outcome.id, &dependents, &mut results);
            } else {
                for dep_id in dependents.get(&outcome.id).cloned().unwrap_or_default() {
                    let Some(deg) = in_degree.get_mut(&dep_id) else { continue };
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 && results.get(&dep_id).map(|r| r.status) == Some(NodeStatus::Pending) {
                        ready.push_back(dep_id);
                    }
                }
            }
        }

        let status = Self::overall_status(&results);
        info!(status = ?status, "DAG execution finished");

        Ok(GraphExecutionResult {
            name: graph.name.clone(),
            status,
            start_time,
            end_time: Utc::now(),
            node_results: results,
        })
    }

    fn dry_run_result(graph: &ExecutionGraph, start_time: chrono::DateTime<Utc>) -> GraphExecutionResult {
        let now = Utc::now();
        let node_results = graph
            .nodes()
            .values()
            .map(|node| {
                let result = NodeResult {
                    name: node.name.clone(),
                    step_name: node.step_name.clone(),
                    status: NodeStatus::Skipped,
                    message: "Dry run: Node execution skipped".to_string(),
                    start_time: now,
                    end_time: now,
                    host_results: HashMap::new(),
                };
                (node.id.clone(), result)
            })
            .collect();

        GraphExecutionResult {
            name: graph.name.clone(),
            status: NodeStatus::Success,
            start_time,
            end_time: now,
            node_results,
        }
    }

    fn overall_status(results: &HashMap<NodeId, NodeResult>) -> NodeStatus {
        if results.values().any(|r| r.status == NodeStatus::Failed) {
            return NodeStatus::Failed;
        }
        if results.values().any(|r| r.status == NodeStatus::Success) {
            return NodeStatus::Success;
        }
        if !results.is_empty() && results.values().all(|r| r.status == NodeStatus::Skipped) {
            return NodeStatus::Skipped;
        }
        NodeStatus::Success
    }
}

/// Depth-first transitive skip propagation from a newly failed/skipped node.
/// Returns the number of newly-skipped (and thus newly-"processed") nodes.
fn propagate_skip(
    from: &NodeId,
    dependents: &HashMap<NodeId, Vec<NodeId>>,
    results: &mut HashMap<NodeId, NodeResult>,
) -> usize {
    let mut count = 0;
    let mut stack: Vec<NodeId> = dependents.get(from).cloned().unwrap_or_default();
    let mut visited: HashSet<NodeId> = HashSet::new();

    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let Some(result) = results.get_mut(&id) else { continue };
        if result.status != NodeStatus::Pending {
            continue; // already terminal; leave untouched
        }
        let now = Utc::now();
        result.status = NodeStatus::Skipped;
        result.message = format!("skipped due to failed dependency {from}");
        result.start_time = now;
        result.end_time = now;
        count += 1;

        if let Some(next) = dependents.get(&id) {
            stack.extend(next.iter().cloned());
        }
    }
    count
}

/// Marks every node still `Pending` or `Running` as `Failed` with
/// `EngineError::Cancelled`, called once the engine-wide token trips.
fn mark_cancelled(results: &mut HashMap<NodeId, NodeResult>) {
    let now = Utc::now();
    let message = EngineError::Cancelled("engine execution context was cancelled".to_string()).to_string();
    for result in results.values_mut() {
        if matches!(result.status, NodeStatus::Pending | NodeStatus::Running) {
            result.status = NodeStatus::Failed;
            result.message = message.clone();
            result.start_time = now;
            result.end_time = now;
        }
    }
}

fn spawn_node(
    node: ExecutionNode,
    ctx: Arc<dyn EngineExecuteContext>,
    parent_cancel: CancellationToken,
    tx: mpsc::UnboundedSender<NodeOutcome>,
) {
    tokio::spawn(async move {
        let outcome = run_node(node, ctx, parent_cancel).await;
        let _ = tx.send(outcome);
    });
}

async fn run_node(
    node: ExecutionNode,
    ctx: Arc<dyn EngineExecuteContext>,
    parent_cancel: CancellationToken,
) -> NodeOutcome {
    let node_cancel = parent_cancel.child_token();
    let mut join_set = JoinSet::new();

    for host in node.hosts.clone() {
        let step = node.step.clone();
        let step_ctx = ctx.for_host(&host).with_cancellation(node_cancel.clone());
        let node_cancel = node_cancel.clone();
        join_set.spawn(async move {
            let result = run_host(step, &step_ctx, &host).await;
            if result.status == NodeStatus::Failed {
                node_cancel.cancel();
            }
            result
        });
    }

    let mut host_results = HashMap::new();
    let mut any_failed = false;
    let mut all_skipped = true;
    let mut message = String::new();

    while let Some(joined) = join_set.join_next().await {
        let hr = match joined {
            Ok(hr) => hr,
            Err(join_err) => HostResult::failed(
                "unknown".to_string(),
                format!("host task panicked: {join_err}"),
                Utc::now(),
                None,
                None,
            ),
        };
        if hr.status == NodeStatus::Failed {
            if !any_failed {
                message = hr.message.clone();
            }
            any_failed = true;
        }
        if hr.status != NodeStatus::Skipped {
            all_skipped = false;
        }
        host_results.insert(hr.host_name.clone(), hr);
    }

    let status = if any_failed {
        NodeStatus::Failed
    } else if all_skipped {
        NodeStatus::Skipped
    } else {
        NodeStatus::Success
    };

    NodeOutcome {
        id: node.id,
        status,
        message,
        host_results,
    }
}

async fn run_host(step: Arc<dyn Step>, ctx: &StepContext, host: &Host) -> HostResult {
    let start = Utc::now();

    match step.precheck(ctx, host).await {
        Ok(true) => return HostResult::skipped_precheck(host.name.clone(), start),
        Ok(false) => {}
        Err(e) => {
            let (stdout, stderr) = e.command_output();
            return HostResult::failed(host.name.clone(), e.to_string(), start, stdout, stderr);
        }
    }

    match step.run(ctx, host).await {
        Ok(()) => HostResult::success(host.name.clone(), start),
        Err(e) => {
            let (stdout, stderr) = e.command_output();
            let mut message = format!(
                "step '{}' on host '{}' failed: {}",
                step.meta().name,
                host.name,
                e
            );
            if let Err(rollback_err) = step.rollback(ctx, host).await {
                message.push_str(&format!(" (rollback failed: {rollback_err})"));
            }
            HostResult::failed(host.name.clone(), message, start, stdout, stderr)
        }
    }
}
