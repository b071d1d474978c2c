use std::path::PathBuf;

use crate::config::expand_path;
use crate::error::Result;

use super::super::autodetect::{MountIntent, detect_source, explicit_source};
use super::super::cancel::CancelToken;
use super::super::events::Event;
use super::super::mount as mount_ops;
use super::super::options::{MountOptions, ProjectSelector, UmountOptions, Workspace};
use super::super::outcome::{MountOutcome, OperationOutput, OperationResult};
use super::super::project::Project;
use super::super::reporter::Reporter;
use super::lifecycle::restart_services;
use super::{ReporterProxy, is_running, resolve_project};

/// Replace a source checkout with a local working copy and restart the services using it
/// when the project is up.
pub fn mount(
    workspace: &Workspace,
    options: MountOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<MountOutcome> {
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    let mut project = resolve_project(workspace, &options.selector)?;
    let cwd = &options.selector.cwd;
    let (source_path, detected) = pick_source(
        workspace,
        &project,
        &options.selector,
        options.source.as_deref(),
        MountIntent::Mount,
    )?;
    let local_path = match options.path.as_deref() {
        Some(path) => expand_path(path, cwd),
        None => detected.unwrap_or_else(|| cwd.clone()),
    };

    let affected = mount_ops::mount(&mut project, &source_path, &local_path)?;
    reporter.emit(Event::info(format!(
        "Mounted {source_path} to {}",
        local_path.display()
    )));
    let restarted = restart_if_running(&mut reporter, workspace, &project, &affected)?;

    drop(reporter);
    Ok(OperationOutput::new(MountOutcome {
        project: project.name,
        source_path,
        local_path,
        affected,
        restarted,
    })
    .with_events(events))
}

/// Return a source to its checkout under `./sources` and restart the services using it
/// when the project is up.
pub fn umount(
    workspace: &Workspace,
    options: UmountOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<MountOutcome> {
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    let mut project = resolve_project(workspace, &options.selector)?;
    let (source_path, _) = pick_source(
        workspace,
        &project,
        &options.selector,
        options.source.as_deref(),
        MountIntent::Umount,
    )?;
    let local_path = project
        .local_mounts()
        .get(&source_path)
        .map(PathBuf::from)
        .unwrap_or_default();

    let affected = mount_ops::umount(&mut project, &source_path)?;
    reporter.emit(Event::info(format!("Unmounted {source_path}")));
    let restarted = restart_if_running(&mut reporter, workspace, &project, &affected)?;

    drop(reporter);
    Ok(OperationOutput::new(MountOutcome {
        project: project.name,
        source_path,
        local_path,
        affected,
        restarted,
    })
    .with_events(events))
}

/// The named source, or the one the working directory belongs to with its local path.
fn pick_source(
    workspace: &Workspace,
    project: &Project,
    selector: &ProjectSelector,
    source: Option<&str>,
    intent: MountIntent,
) -> Result<(String, Option<PathBuf>)> {
    match source {
        Some(source) => Ok((explicit_source(project, source, intent)?, None)),
        None => {
            let found = detect_source(
                project,
                &selector.cwd,
                intent,
                &workspace.backend.commands,
                &CancelToken::new(),
            )?;
            Ok((found.source_path, Some(found.local_path)))
        }
    }
}

fn restart_if_running(
    reporter: &mut ReporterProxy<'_, '_>,
    workspace: &Workspace,
    project: &Project,
    affected: &[String],
) -> Result<bool> {
    if affected.is_empty() || !is_running(workspace, project, &CancelToken::new())? {
        return Ok(false);
    }
    restart_services(reporter, workspace, project, affected, false)?;
    Ok(true)
}
