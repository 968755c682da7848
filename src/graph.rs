//! Execution graph model (§4.2): immutable-once-built nodes, reusable
//! fragments with entry/exit frontiers, and the merge/link primitives every
//! planner goes through. No API exposes raw node mutation beyond
//! `add_node`/`add_dependency`/`merge`/`link`/`calculate_entry_and_exit`, so
//! ID uniqueness and dependency validity stay centrally checked.

use crate::error::{EngineError, Result};
use crate::host::Host;
use crate::step::Step;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

pub type NodeId = String;

/// A planned unit of work: one step bound to a set of hosts, plus the other
/// nodes it depends on.
#[derive(Clone)]
pub struct ExecutionNode {
    pub id: NodeId,
    pub name: String,
    pub step_name: String,
    pub step: Arc<dyn Step>,
    pub hosts: Vec<Host>,
    pub dependencies: Vec<NodeId>,
}

impl ExecutionNode {
    pub fn new(name: impl Into<String>, step: Arc<dyn Step>, hosts: Vec<Host>) -> Self {
        let name = name.into();
        let step_name = step.meta().name.clone();
        Self {
            id: String::new(),
            name,
            step_name,
            step,
            hosts,
            dependencies: Vec::new(),
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = NodeId>) -> Self {
        self.dependencies.extend(deps);
        self
    }
}

/// A reusable sub-graph with known entry and exit frontiers, returned by
/// every `Plan` call. The final top-level fragment produced by a pipeline
/// plan *is* the `ExecutionGraph`.
#[derive(Clone)]
pub struct ExecutionFragment {
    pub name: String,
    nodes: HashMap<NodeId, ExecutionNode>,
    entry_nodes: Vec<NodeId>,
    exit_nodes: Vec<NodeId>,
}

pub type ExecutionGraph = ExecutionFragment;

impl ExecutionFragment {
    /// Used whenever a planner determines a component is not required.
    pub fn new_empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            entry_nodes: Vec::new(),
            exit_nodes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &HashMap<NodeId, ExecutionNode> {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&ExecutionNode> {
        self.nodes.get(id)
    }

    pub fn entry_nodes(&self) -> &[NodeId] {
        &self.entry_nodes
    }

    pub fn exit_nodes(&self) -> &[NodeId] {
        &self.exit_nodes
    }

    /// Assigns an ID if unset, rejects duplicates.
    pub fn add_node(&mut self, mut node: ExecutionNode) -> Result<NodeId> {
        if node.id.is_empty() {
            node.id = format!("{}-{}", node.step_name, Uuid::new_v4());
        }
        if self.nodes.contains_key(&node.id) {
            return Err(EngineError::DuplicateNodeId(node.id));
        }
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        Ok(id)
    }

    /// Appends `from` to `to`'s dependencies; idempotent. Fails if either ID
    /// is unknown.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.nodes.contains_key(from) {
            return Err(EngineError::UnknownNodeId(from.to_string()));
        }
        let node = self
            .nodes
            .get_mut(to)
            .ok_or_else(|| EngineError::UnknownNodeId(to.to_string()))?;
        if !node.dependencies.iter().any(|d| d == from) {
            node.dependencies.push(from.to_string());
        }
        Ok(())
    }

    /// Imports all nodes of `other`, preserving IDs. Fails on ID collision:
    /// naming discipline (e.g. `<task>-<host>-<purpose>` prefixes) is the
    /// planner's responsibility.
    pub fn merge(&mut self, other: ExecutionFragment) -> Result<()> {
        for id in other.nodes.keys() {
            if self.nodes.contains_key(id) {
                return Err(EngineError::DuplicateNodeId(id.clone()));
            }
        }
        self.nodes.extend(other.nodes);
        Ok(())
    }

    /// For each `to`, appends each `from` as a dependency (deduplicated).
    /// Used to serialize sibling fragments that must run in order after a
    /// merge. Applying the same link set twice is a no-op the second time.
    pub fn link(&mut self, from_ids: &[NodeId], to_ids: &[NodeId]) -> Result<()> {
        for to in to_ids {
            for from in from_ids {
                self.add_dependency(from, to)?;
            }
        }
        Ok(())
    }

    /// Recomputes the two frontier slices by counting in-fragment edges.
    /// Entry nodes have no in-fragment dependencies; exit nodes have no
    /// in-fragment dependents.
    pub fn calculate_entry_and_exit(&mut self) {
        let mut has_dependent: HashSet<NodeId> = HashSet::new();
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if self.nodes.contains_key(dep) {
                    has_dependent.insert(dep.clone());
                }
            }
        }

        self.entry_nodes = self
            .nodes
            .values()
            .filter(|n| {
                n.dependencies
                    .iter()
                    .all(|d| !self.nodes.contains_key(d))
            })
            .map(|n| n.id.clone())
            .collect();
        self.exit_nodes = self
            .nodes
            .keys()
            .filter(|id| !has_dependent.contains(*id))
            .cloned()
            .collect();
    }

    /// Verifies every dependency target exists, detects cycles via DFS, and
    /// rejects self-loops. Does not check for a nonempty entry frontier —
    /// that is a graph-level (executor) concern, since an empty fragment is
    /// a valid intermediate planning artefact.
    pub fn validate(&self) -> Result<()> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if dep == &node.id {
                    return Err(EngineError::DagCycleDetected(node.id.clone()));
                }
                if !self.nodes.contains_key(dep) {
                    return Err(EngineError::UnknownNodeId(dep.clone()));
                }
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            id: &'a str,
            nodes: &'a HashMap<NodeId, ExecutionNode>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => return Err(EngineError::DagCycleDetected(id.to_string())),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            for dep in &nodes[id].dependencies {
                visit(dep, nodes, marks)?;
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for id in self.nodes.keys() {
            visit(id, &self.nodes, &mut marks)?;
        }
        Ok(())
    }
}

/// Deduplicated, order-preserving slice helper.
pub fn unique_node_ids(ids: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in ids {
        if seen.insert(id.clone()) {
            out.push(id);
        }
    }
    out
}
