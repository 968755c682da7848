//! The atomic unit of work (§3 "Step"). Idempotence is the step author's
//! responsibility; the executor guarantees `precheck` runs before `run` and
//! that `rollback` runs iff `run` returned an error.

use crate::context::StepContext;
use crate::error::Result;
use crate::host::Host;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct StepMeta {
    pub name: String,
    pub description: String,
}

impl StepMeta {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    fn meta(&self) -> &StepMeta;

    /// Read-only probe. `Ok(true)` means the step's post-condition is
    /// already met on this host; `run` is then skipped entirely.
    async fn precheck(&self, ctx: &StepContext, host: &Host) -> Result<bool>;

    async fn run(&self, ctx: &StepContext, host: &Host) -> Result<()>;

    /// Best-effort compensation, invoked only after `run` fails. A default
    /// no-op: most steps have nothing to undo.
    async fn rollback(&self, _ctx: &StepContext, _host: &Host) -> Result<()> {
        Ok(())
    }
}
