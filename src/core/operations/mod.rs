//! High-level operations behind every CLI command.
//!
//! Each operation takes its options plus an optional [`Reporter`] and returns an
//! [`OperationOutput`]; events are both forwarded live and kept in the output.

use std::panic;
use std::sync::mpsc::{self, Sender};
use std::thread;

use crate::error::{Error, Result};

use super::autodetect::{detect_project, installed_projects};
use super::cancel::CancelToken;
use super::depgraph;
use super::events::Event;
use super::hosts;
use super::options::{ProjectSelector, Workspace};
use super::outcome::HostsStatus;
use super::project::Project;
use super::reporter::Reporter;
use super::runners::{RunContext, Runner, RunnerKind, filter_labels};

mod lifecycle;
mod mounts;
mod projects;
mod session;

pub use lifecycle::{destroy, down, restart, up, update_hosts};
pub use mounts::{mount, umount};
pub use projects::{info, init, list, update};
pub use session::{env, logs, ps, run, shell};

pub(super) struct ReporterProxy<'a, 'b> {
    delegate: Option<&'a mut dyn Reporter>,
    events: &'b mut Vec<Event>,
}

impl<'a, 'b> ReporterProxy<'a, 'b> {
    fn new(delegate: Option<&'a mut dyn Reporter>, events: &'b mut Vec<Event>) -> Self {
        Self { delegate, events }
    }

    fn emit(&mut self, event: Event) {
        self.events.push(event.clone());
        if let Some(reporter) = &mut self.delegate {
            reporter.report(event);
        }
    }

    /// Run `work` on a worker thread, relaying the events it sends as they arrive.
    fn relay<T, F>(&mut self, work: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(Sender<Event>) -> Result<T> + Send,
    {
        let (event_tx, event_rx) = mpsc::channel::<Event>();
        thread::scope(|scope| {
            let handle = scope.spawn(move || work(event_tx));
            while let Ok(event) = event_rx.recv() {
                self.emit(event);
            }
            match handle.join() {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            }
        })
    }
}

impl Reporter for ReporterProxy<'_, '_> {
    fn report(&mut self, event: Event) {
        self.emit(event);
    }
}

/// Load the project named by `selector`, or the one its working directory belongs to.
fn resolve_project(workspace: &Workspace, selector: &ProjectSelector) -> Result<Project> {
    if let Some(name) = &selector.name {
        return load_named(workspace, name, &selector.profiles);
    }
    let (projects, _) = installed_projects(&workspace.app_dir, &selector.profiles);
    let project = detect_project(
        &projects,
        None,
        &selector.cwd,
        &workspace.backend.commands,
        &CancelToken::new(),
    )?;
    Ok(project.clone())
}

fn load_named(workspace: &Workspace, name: &str, profiles: &[String]) -> Result<Project> {
    Project::load(&workspace.app_dir, name, profiles).map_err(|err| match err {
        Error::MissingProjectDir { .. } => Error::UnknownProject {
            name: Some(name.to_string()),
        },
        other => other,
    })
}

fn run_context(workspace: &Workspace, project: &Project) -> RunContext {
    RunContext::new(
        &project.name,
        &project.work_dir,
        workspace.backend.engine.clone(),
        workspace.backend.commands.clone(),
    )
    .with_timeouts(
        workspace.settings.timeouts.readiness(),
        workspace.settings.timeouts.sync(),
    )
}

/// Start every runner, round by round.
fn start_rounds(
    reporter: &mut ReporterProxy<'_, '_>,
    workspace: &Workspace,
    project: &Project,
    runners: Vec<Runner>,
    cancel: &CancelToken,
) -> Result<()> {
    let rounds = depgraph::build_rounds(runners)?;
    reporter.relay(|events| {
        let ctx = run_context(workspace, project).with_events(events);
        depgraph::exec(&rounds, cancel, |runner, token| runner.start(&ctx, token))
    })
}

/// Tear runners down last round first. Failures are reported and skipped; returns how many
/// steps failed.
fn stop_rounds<F>(
    reporter: &mut ReporterProxy<'_, '_>,
    workspace: &Workspace,
    project: &Project,
    runners: Vec<Runner>,
    cancel: &CancelToken,
    teardown: F,
) -> Result<usize>
where
    F: Fn(&Runner, &RunContext, &CancelToken) -> Result<()> + Sync,
{
    let rounds = depgraph::build_rounds(runners)?;
    reporter.relay(|events| {
        let ctx = run_context(workspace, project).with_events(events);
        let failures = std::sync::atomic::AtomicUsize::new(0);
        depgraph::exec_reverse(&rounds, cancel, |runner, token| {
            if let Err(err) = teardown(runner, &ctx, token) {
                failures.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                ctx.emit(Event::StopFailed {
                    kind: runner.kind(),
                    reference: runner.reference.clone(),
                    error: err.to_string(),
                });
            }
            Ok(())
        })?;
        Ok(failures.into_inner())
    })
}

/// Whether any service container of the project is running.
fn is_running(workspace: &Workspace, project: &Project, cancel: &CancelToken) -> Result<bool> {
    let filter = filter_labels(&project.name, Some(RunnerKind::Service), None);
    Ok(workspace
        .backend
        .engine
        .list_containers(&filter, cancel)?
        .iter()
        .any(|container| container.state == "running"))
}

/// Write (or with `cleanup`, remove) the project's hosts block, remembering in the state file
/// whether one exists. A permission failure is not an error: the caller elevates instead.
fn sync_hosts(
    reporter: &mut ReporterProxy<'_, '_>,
    workspace: &Workspace,
    project: &mut Project,
    cleanup: bool,
) -> Result<HostsStatus> {
    let entries: &[String] = if cleanup { &[] } else { &project.host_entries };
    if entries.is_empty() && !project.state.has_hosts {
        return Ok(HostsStatus::Unchanged);
    }

    let path = workspace.settings.hosts.file.clone();
    let has_hosts = !entries.is_empty();
    let status = match hosts::save(&path, &project.name, entries) {
        Ok(changed) => {
            reporter.emit(Event::HostsUpdated {
                path: path.clone(),
                changed,
            });
            if changed {
                HostsStatus::Updated
            } else {
                HostsStatus::Unchanged
            }
        }
        Err(Error::PermissionDenied { .. }) => HostsStatus::NeedsElevation,
        Err(err) => return Err(err),
    };

    if project.state.has_hosts != has_hosts && project.work_dir.is_dir() {
        project.state.has_hosts = has_hosts;
        project.save_state()?;
    }
    Ok(status)
}
