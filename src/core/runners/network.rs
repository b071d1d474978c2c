use crate::error::{Error, Result};

use super::super::cancel::CancelToken;
use super::{RunContext, RunnerKind};

/// The project's bridge network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkJob {
    pub name: String,
}

impl NetworkJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub(super) fn start(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let filter = ctx.filter(RunnerKind::Network, &self.name);
        if !ctx.engine.list_networks(&filter, cancel)?.is_empty() {
            return Ok(());
        }
        match ctx.engine.create_network(
            &self.name,
            &ctx.labels(RunnerKind::Network, &self.name),
            cancel,
        ) {
            // A concurrent invocation won the race.
            Err(Error::CommandFailed { stderr, .. }) if stderr.contains("already exists") => Ok(()),
            other => other,
        }
    }

    pub(super) fn stop(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let filter = ctx.filter(RunnerKind::Network, &self.name);
        for network in ctx.engine.list_networks(&filter, cancel)? {
            ctx.engine.remove_network(&network, cancel)?;
        }
        Ok(())
    }
}
