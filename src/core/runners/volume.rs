use crate::error::Result;

use super::super::cancel::CancelToken;
use super::{RunContext, RunnerKind, volume_name};

/// A named project volume, created as `<project>-<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeJob {
    pub name: String,
}

impl VolumeJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub(super) fn start(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let filter = ctx.filter(RunnerKind::Volume, &self.name);
        if !ctx.engine.list_volumes(&filter, cancel)?.is_empty() {
            return Ok(());
        }
        ctx.engine.create_volume(
            &volume_name(&ctx.project, &self.name),
            &ctx.labels(RunnerKind::Volume, &self.name),
            cancel,
        )
    }

    pub(super) fn destroy(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let filter = ctx.filter(RunnerKind::Volume, &self.name);
        for volume in ctx.engine.list_volumes(&filter, cancel)? {
            ctx.engine.remove_volume(&volume, cancel)?;
        }
        Ok(())
    }
}
