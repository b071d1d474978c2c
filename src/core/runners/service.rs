use std::time::Duration;

use crate::error::{Error, Result};

use super::super::cancel::CancelToken;
use super::super::engine::{ContainerSpec, ContainerState, HealthcheckSpec, PortSpec};
use super::super::events::Event;
use super::super::project::{Service, to_ascii_host};
use super::{RunContext, RunnerKind, get_envs, get_mounts, poll_until};

const READINESS_POLL: Duration = Duration::from_millis(250);
const HEALTH_INTERVAL: Duration = Duration::from_secs(1);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_LABEL_LEN: usize = 63;

/// A long-running service container named `<project>-<service>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceJob {
    pub service: Service,
}

impl ServiceJob {
    pub fn new(service: Service) -> Self {
        Self { service }
    }

    pub fn container_name(&self, project: &str) -> String {
        format!("{project}-{}", self.service.name)
    }

    pub(super) fn start(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let name = self.container_name(&ctx.project);
        let filter = ctx.filter(RunnerKind::Service, &self.service.name);

        if let Some(existing) = ctx.engine.list_containers(&filter, cancel)?.into_iter().next() {
            if existing.state == "running" {
                return Ok(());
            }
            ctx.engine
                .start_container(&existing.id, cancel)
                .map_err(|source| start_failed(&name, source))?;
            return self.wait_ready(ctx, &existing.id, &name, cancel);
        }

        let spec = self.container_spec(ctx)?;
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
            .map_err(|source| start_failed(&name, source))?;
        ctx.emit(Event::ContainerStarted { name: name.clone() });

        self.wait_ready(ctx, &id, &name, cancel)
    }

    pub(super) fn stop(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        let filter = ctx.filter(RunnerKind::Service, &self.service.name);
        let timeout = self.service.stop_grace_period.unwrap_or(Duration::ZERO);
        ctx.remove_containers(&filter, timeout, cancel).map(drop)
    }

    pub(crate) fn container_spec(&self, ctx: &RunContext) -> Result<ContainerSpec> {
        let service = &self.service;
        let mut labels = service.labels.clone();
        labels.extend(ctx.labels(RunnerKind::Service, &service.name));

        let mut aliases = vec![service.name.clone()];
        aliases.extend(
            service
                .host_aliases
                .iter()
                .filter(|alias| **alias != service.name)
                .cloned(),
        );

        Ok(ContainerSpec {
            name: self.container_name(&ctx.project),
            image: service.image.clone(),
            command: service.command.clone(),
            entrypoint: service.entrypoint.clone(),
            env: get_envs(&service.environment, &service.env_files, &ctx.work_dir)?,
            labels,
            mounts: get_mounts(&service.volumes, &ctx.project, &ctx.work_dir)?,
            ports: service
                .ports
                .iter()
                .map(|port| PortSpec {
                    host_ip: port.host_ip.clone(),
                    published: port.published,
                    target: port.target,
                    protocol: port.protocol.clone(),
                })
                .collect(),
            healthcheck: service.healthcheck.as_ref().map(|test| HealthcheckSpec {
                test: test.clone(),
                interval: HEALTH_INTERVAL,
                timeout: HEALTH_TIMEOUT,
            }),
            hostname: service
                .hostname
                .clone()
                .or_else(|| rfc1123_hostname(&service.name)),
            network: Some(ctx.network.clone()),
            network_aliases: aliases,
            working_dir: service.working_dir.clone(),
            user: service.user.clone(),
            stop_timeout: service.stop_grace_period,
        })
    }

    /// Healthy when a healthcheck is declared, otherwise out of the `created` state.
    fn wait_ready(&self, ctx: &RunContext, id: &str, name: &str, cancel: &CancelToken) -> Result<()> {
        let has_healthcheck = self.service.healthcheck.is_some();
        let ready = poll_until(
            ctx,
            id,
            ctx.readiness_timeout,
            cancel,
            |state: &ContainerState| {
                if has_healthcheck {
                    if !state.running && state.status == "exited" {
                        return Err(Error::Engine {
                            message: format!(
                                "container {name} exited with code {} before becoming healthy",
                                state.exit_code
                            ),
                        });
                    }
                    Ok(state.health.as_deref() == Some("healthy"))
                } else {
                    Ok(!matches!(state.status.as_str(), "created" | "starting" | ""))
                }
            },
            |_| READINESS_POLL,
        )?;
        if !ready {
            return Err(Error::ReadinessTimeout {
                name: name.to_string(),
                waited_secs: ctx.readiness_timeout.as_secs(),
            });
        }
        ctx.emit(Event::ContainerReady {
            name: name.to_string(),
        });
        Ok(())
    }
}

fn start_failed(name: &str, source: Error) -> Error {
    match source {
        Error::Cancelled => Error::Cancelled,
        source => Error::ContainerStartFailed {
            name: name.to_string(),
            source: Box::new(source),
        },
    }
}

/// Hostname derived from a service name: IDNA ASCII, `.` and `_` replaced by `-`, one label
/// of at most 63 characters.
pub fn rfc1123_hostname(name: &str) -> Option<String> {
    let replaced: String = name
        .trim()
        .chars()
        .map(|ch| if ch == '.' || ch == '_' { '-' } else { ch })
        .collect();
    let ascii = to_ascii_host(&replaced)?;
    let mut label: String = ascii
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
        .take(MAX_LABEL_LEN)
        .collect();
    label = label.trim_matches('-').to_string();
    (!label.is_empty()).then_some(label)
}
