use std::fs;
use std::thread;

use crate::error::{Error, IoAction, Result};

use super::super::autodetect::{MountIntent, detect_source};
use super::super::cancel::CancelToken;
use super::super::engine::{ContainerSummary, ExecSpec, LogOptions};
use super::super::events::Event;
use super::super::options::{InfoOptions, LogsOptions, RunOptions, ShellOptions, Workspace};
use super::super::outcome::{
    AttachedOutcome, ContainerRow, OperationOutput, OperationResult, PsOutcome,
};
use super::super::process::CommandSpec;
use super::super::project::{ENV_FILE_NAME, Project};
use super::super::reporter::Reporter;
use super::super::runners::{LABEL_DEVBOX_NAME, LABEL_DEVBOX_TYPE, RunnerKind, filter_labels};
use super::{ReporterProxy, resolve_project};

const DEFAULT_EDITOR: &str = "vi";

/// Containers of the project in any state, sorted by name.
pub fn ps(
    workspace: &Workspace,
    options: InfoOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<PsOutcome> {
    let mut events = Vec::new();
    let reporter = ReporterProxy::new(reporter, &mut events);

    let project = resolve_project(workspace, &options.selector)?;
    let mut rows: Vec<ContainerRow> = workspace
        .backend
        .engine
        .list_containers(&filter_labels(&project.name, None, None), &CancelToken::new())?
        .into_iter()
        .map(|container| {
            let label = |key: &str| container.labels.get(key).cloned().unwrap_or_default();
            ContainerRow {
                service: label(LABEL_DEVBOX_NAME),
                kind: label(LABEL_DEVBOX_TYPE),
                name: container.name.trim_start_matches('/').to_string(),
                state: container.state,
                status: container.status,
            }
        })
        .collect();
    rows.sort_by(|left, right| left.name.cmp(&right.name));

    drop(reporter);
    Ok(OperationOutput::new(PsOutcome {
        project: project.name,
        rows,
    })
    .with_events(events))
}

/// Print service logs; with `follow` and several services the streams are interleaved.
pub fn logs(
    workspace: &Workspace,
    options: LogsOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<AttachedOutcome> {
    let mut events = Vec::new();
    let reporter = ReporterProxy::new(reporter, &mut events);

    let project = resolve_project(workspace, &options.selector)?;
    for name in &options.services {
        ensure_service(&project, name)?;
    }
    let containers: Vec<ContainerSummary> = service_containers(workspace, &project)?
        .into_iter()
        .filter(|container| {
            options.services.is_empty()
                || container
                    .labels
                    .get(LABEL_DEVBOX_NAME)
                    .is_some_and(|name| options.services.contains(name))
        })
        .collect();
    if let [missing, ..] = options.services.as_slice() {
        if containers.is_empty() {
            return Err(Error::ServiceNotRunning {
                service: missing.clone(),
            });
        }
    }

    let log_options = LogOptions {
        follow: options.follow,
        tail: options.tail,
    };
    let engine = &workspace.backend.engine;
    let codes: Vec<Result<i32>> = if options.follow && containers.len() > 1 {
        thread::scope(|scope| {
            let handles: Vec<_> = containers
                .iter()
                .map(|container| scope.spawn(move || engine.logs(&container.id, log_options)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    } else {
        containers
            .iter()
            .map(|container| engine.logs(&container.id, log_options))
            .collect()
    };
    let mut exit_code = 0;
    for code in codes {
        let code = code?;
        if exit_code == 0 {
            exit_code = code;
        }
    }

    drop(reporter);
    Ok(OperationOutput::new(AttachedOutcome {
        project: project.name,
        exit_code,
    })
    .with_events(events))
}

/// Open an interactive shell in a running service container.
///
/// Without an explicit service, the first service using the source checkout the current
/// directory belongs to is picked.
pub fn shell(
    workspace: &Workspace,
    options: ShellOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<AttachedOutcome> {
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    let project = resolve_project(workspace, &options.selector)?;
    let service = match options.service {
        Some(service) => {
            ensure_service(&project, &service)?;
            service
        }
        None => {
            let found = detect_source(
                &project,
                &options.selector.cwd,
                MountIntent::Any,
                &workspace.backend.commands,
                &CancelToken::new(),
            )?;
            project
                .services_affected_by(&found.source_path)
                .into_iter()
                .next()
                .ok_or_else(|| Error::UnknownService {
                    project: project.name.clone(),
                    name: found.source_path.clone(),
                })?
        }
    };

    let container = running_container(workspace, &project, &service)?;
    reporter.emit(Event::info(format!("Entering `{service}` ({})", container.name)));
    let shell = if options.bash { "bash" } else { "/bin/sh" };
    let exit_code = workspace.backend.engine.exec(
        &container.id,
        &ExecSpec {
            command: vec![shell.to_string()],
            tty: true,
            interactive: true,
            ..ExecSpec::default()
        },
    )?;

    drop(reporter);
    Ok(OperationOutput::new(AttachedOutcome {
        project: project.name,
        exit_code,
    })
    .with_events(events))
}

/// Run a named scenario inside its service container, passing extra arguments through.
pub fn run(
    workspace: &Workspace,
    options: RunOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<AttachedOutcome> {
    let mut events = Vec::new();
    let reporter = ReporterProxy::new(reporter, &mut events);

    let project = resolve_project(workspace, &options.selector)?;
    let scenario = project
        .scenarios
        .get(&options.scenario)
        .ok_or_else(|| Error::UnknownScenario {
            project: project.name.clone(),
            name: options.scenario.clone(),
        })?;
    let container = running_container(workspace, &project, &scenario.service)?;

    let mut command = scenario.entrypoint.clone().unwrap_or_default();
    command.extend(scenario.command.iter().cloned());
    command.extend(options.args);
    let exit_code = workspace.backend.engine.exec(
        &container.id,
        &ExecSpec {
            command,
            tty: scenario.tty,
            interactive: scenario.stdin_open,
            user: scenario.user.clone(),
            working_dir: scenario.working_dir.clone(),
            env: Vec::new(),
        },
    )?;
    if exit_code != 0 {
        return Err(Error::ScenarioFailed {
            scenario: scenario.name.clone(),
            code: exit_code,
        });
    }

    drop(reporter);
    Ok(OperationOutput::new(AttachedOutcome {
        project: project.name,
        exit_code,
    })
    .with_events(events))
}

/// Open the project's `.env` file in `$VISUAL`, `$EDITOR` or `vi`.
pub fn env(
    workspace: &Workspace,
    options: InfoOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<AttachedOutcome> {
    let mut events = Vec::new();
    let reporter = ReporterProxy::new(reporter, &mut events);

    let project = resolve_project(workspace, &options.selector)?;
    let path = project.work_dir.join(ENV_FILE_NAME);
    if !path.exists() {
        fs::write(&path, "").map_err(|source| Error::io(&path, source, IoAction::Write))?;
    }

    let editor = editor_command();
    let mut words = editor.split_whitespace();
    let program = words.next().unwrap_or(DEFAULT_EDITOR);
    let spec = CommandSpec::new(program)
        .args(words)
        .arg(path.to_string_lossy().into_owned());
    let exit_code = workspace.backend.commands.run_attached(&spec)?;

    drop(reporter);
    Ok(OperationOutput::new(AttachedOutcome {
        project: project.name,
        exit_code,
    })
    .with_events(events))
}

fn editor_command() -> String {
    ["VISUAL", "EDITOR"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_EDITOR.to_string())
}

fn ensure_service(project: &Project, name: &str) -> Result<()> {
    if project.services.contains_key(name) {
        Ok(())
    } else {
        Err(Error::UnknownService {
            project: project.name.clone(),
            name: name.to_string(),
        })
    }
}

fn service_containers(workspace: &Workspace, project: &Project) -> Result<Vec<ContainerSummary>> {
    let mut containers = workspace.backend.engine.list_containers(
        &filter_labels(&project.name, Some(RunnerKind::Service), None),
        &CancelToken::new(),
    )?;
    containers.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(containers)
}

fn running_container(
    workspace: &Workspace,
    project: &Project,
    service: &str,
) -> Result<ContainerSummary> {
    workspace
        .backend
        .engine
        .list_containers(
            &filter_labels(&project.name, Some(RunnerKind::Service), Some(service)),
            &CancelToken::new(),
        )?
        .into_iter()
        .find(|container| container.state == "running")
        .ok_or_else(|| Error::ServiceNotRunning {
            service: service.to_string(),
        })
}
