use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Well-known role tag for the synthetic control node.
pub const CONTROL_NODE_ROLE: &str = "control-node";

/// A target machine in the fleet: either a real SSH-reachable host or the
/// synthetic control node (the orchestrator's own machine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub address: String,
    pub user: String,
    pub port: u16,
    pub roles: HashSet<String>,
}

impl Host {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        user: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            user: user.into(),
            port,
            roles: HashSet::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// The synthetic host representing the orchestrator's own machine.
    /// Always present in the inventory; the only host allowed to run
    /// local-only work (downloads, rendering, helm templating).
    pub fn control_node() -> Self {
        Self::new("control-node", "127.0.0.1", "local", 0).with_roles([CONTROL_NODE_ROLE])
    }

    pub fn is_control_node(&self) -> bool {
        self.has_role(CONTROL_NODE_ROLE)
    }
}
