//! Result objects produced by the executor (§3 NodeResult/HostResult and
//! §6 status vocabulary). These are plain in-memory data: the core mandates
//! no persistence, but they derive `Serialize` so a collaborator can report
//! them however it likes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::graph::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostResult {
    pub host_name: String,
    pub status: NodeStatus,
    pub message: String,
    pub skipped: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl HostResult {
    pub fn success(host_name: String, start_time: DateTime<Utc>) -> Self {
        Self {
            host_name,
            status: NodeStatus::Success,
            message: String::new(),
            skipped: false,
            stdout: None,
            stderr: None,
            start_time,
            end_time: Utc::now(),
        }
    }

    pub fn skipped_precheck(host_name: String, start_time: DateTime<Utc>) -> Self {
        Self {
            host_name,
            status: NodeStatus::Skipped,
            message: "Precheck condition already met".to_string(),
            skipped: true,
            stdout: None,
            stderr: None,
            start_time,
            end_time: Utc::now(),
        }
    }

    pub fn failed(
        host_name: String,
        message: String,
        start_time: DateTime<Utc>,
        stdout: Option<String>,
        stderr: Option<String>,
    ) -> Self {
        Self {
            host_name,
            status: NodeStatus::Failed,
            message,
            skipped: false,
            stdout,
            stderr,
            start_time,
            end_time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub name: String,
    pub step_name: String,
    pub status: NodeStatus,
    pub message: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub host_results: HashMap<String, HostResult>,
}

impl NodeResult {
    pub fn pending(name: String, step_name: String) -> Self {
        let now = Utc::now();
        Self {
            name,
            step_name,
            status: NodeStatus::Pending,
            message: String::new(),
            start_time: now,
            end_time: now,
            host_results: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExecutionResult {
    pub name: String,
    pub status: NodeStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub node_results: HashMap<NodeId, NodeResult>,
}
