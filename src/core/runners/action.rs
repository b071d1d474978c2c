use std::time::Duration;

use crate::error::{Error, Result};

use super::super::cancel::CancelToken;
use super::super::engine::{ContainerSpec, ContainerState};
use super::super::events::Event;
use super::super::project::Action;
use super::{
    LABEL_DEVBOX_NAME, RunContext, RunnerKind, get_envs, get_mounts, poll_until, rfc1123_hostname,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// One-shot commands, each in its own container `<project>-<action>-<index>`.
///
/// A command whose container already exited cleanly is not run again until the project is
/// stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionJob {
    pub action: Action,
}

impl ActionJob {
    pub fn new(action: Action) -> Self {
        Self { action }
    }

    pub(super) fn start(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let action = &self.action;
        let env = get_envs(&action.environment, &action.env_files, &ctx.work_dir)?;
        let mounts = get_mounts(&action.volumes, &ctx.project, &ctx.work_dir)?;
        let filter = ctx.filter(RunnerKind::Action, &action.name);
        let existing = ctx.engine.list_containers(&filter, cancel)?;

        for (index, command) in action.commands.iter().enumerate() {
            cancel.check()?;
            let name = format!("{}-{}-{index}", ctx.project, action.name);
            let rendered = command.join(" ");

            if let Some(previous) = existing.iter().find(|c| c.name.trim_start_matches('/') == name) {
                let state = ctx.engine.inspect_container(&previous.id, cancel)?;
                if !state.running && state.exit_code == 0 {
                    continue;
                }
                let _ = ctx.engine.stop_container(&previous.id, Duration::ZERO, cancel);
                ctx.engine.remove_container(&previous.id, cancel)?;
            }

            let mut labels = ctx.labels(RunnerKind::Action, &action.name);
            labels.insert(format!("{LABEL_DEVBOX_NAME}.container"), name.clone());
            let spec = ContainerSpec {
                name: name.clone(),
                image: action.image.clone(),
                command: command.clone(),
                entrypoint: action.entrypoint.clone(),
                env: env.clone(),
                labels,
                mounts: mounts.clone(),
                hostname: rfc1123_hostname(&format!("{}-{index}", action.name)),
                network: Some(ctx.network.clone()),
                working_dir: action.working_dir.clone(),
                user: action.user.clone(),
                ..ContainerSpec::default()
            };

            let id = ctx
                .engine
                .create_container(&spec, cancel)
                .map_err(|source| match source {
                    Error::Cancelled => Error::Cancelled,
                    source => Error::ContainerCreateFailed {
                        name: name.clone(),
                        source: Box::new(source),
                    },
                })?;
            ctx.engine
                .start_container(&id, cancel)
                .map_err(|source| match source {
                    Error::Cancelled => Error::Cancelled,
                    source => Error::ContainerStartFailed {
                        name: name.clone(),
                        source: Box::new(source),
                    },
                })?;

            let mut exit_code = 0;
            let finished = poll_until(
                ctx,
                &id,
                ctx.readiness_timeout,
                cancel,
                |state: &ContainerState| {
                    exit_code = state.exit_code;
                    Ok(!state.running && state.status != "created")
                },
                backoff,
            )?;
            if !finished {
                return Err(Error::ActionTimeout {
                    name,
                    waited_secs: ctx.readiness_timeout.as_secs(),
                });
            }
            if exit_code != 0 {
                return Err(Error::ActionNonZeroExit {
                    command: rendered,
                    code: exit_code,
                });
            }
        }

        ctx.emit(Event::ActionCompleted {
            name: action.name.clone(),
            commands: action.commands.len(),
        });
        Ok(())
    }

    pub(super) fn stop(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let filter = ctx.filter(RunnerKind::Action, &self.action.name);
        ctx.remove_containers(&filter, Duration::ZERO, cancel).map(drop)
    }
}

/// 50ms doubling per attempt, capped at 2s.
fn backoff(attempt: u32) -> Duration {
    INITIAL_BACKOFF
        .checked_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
        .unwrap_or(MAX_BACKOFF)
        .min(MAX_BACKOFF)
}
