use std::fs;
use std::time::Duration;

use crate::error::{Error, IoAction, Result};

use super::super::cancel::CancelToken;
use super::super::events::Event;
use super::super::hosts;
use super::super::options::{DestroyOptions, HostsOptions, LifecycleOptions, RestartOptions, Workspace};
use super::super::outcome::{
    DestroyOutcome, DownOutcome, HostsOutcome, OperationOutput, OperationResult, RestartOutcome,
    UpOutcome,
};
use super::super::planner::{SourceSync, plan, restrict};
use super::super::project::Project;
use super::super::reporter::Reporter;
use super::super::runners::{RunContext, Runner, RunnerKind, filter_labels};
use super::projects::is_valid_name;
use super::{
    ReporterProxy, load_named, resolve_project, run_context, start_rounds, stop_rounds, sync_hosts,
};

/// Bring the whole project up: sources, images, volumes, network, services and actions.
pub fn up(
    workspace: &Workspace,
    options: LifecycleOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<UpOutcome> {
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    let mut project = resolve_project(workspace, &options.selector)?;
    let runners = plan(&project, SourceSync::Missing)?;
    let started = workload_names(&runners);

    start_rounds(&mut reporter, workspace, &project, runners, &CancelToken::new())?;
    let hosts = sync_hosts(&mut reporter, workspace, &mut project, false)?;

    drop(reporter);
    Ok(OperationOutput::new(UpOutcome {
        project: project.name,
        started,
        hosts,
    })
    .with_events(events))
}

/// Stop and remove every container and the network of the project. Volumes, images and
/// checkouts stay. Failed steps are reported and skipped.
pub fn down(
    workspace: &Workspace,
    options: LifecycleOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<DownOutcome> {
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    let mut project = resolve_project(workspace, &options.selector)?;
    let cancel = CancelToken::new();
    let failures = teardown(&mut reporter, workspace, &project, &cancel, Runner::stop)?;
    let hosts = sync_hosts(&mut reporter, workspace, &mut project, true)?;

    drop(reporter);
    let removed = removed_containers(&events);
    Ok(OperationOutput::new(DownOutcome {
        project: project.name,
        removed,
        failures,
        hosts,
    })
    .with_events(events))
}

/// Restart services in dependency order, rebuilding their images. Every service when none
/// is named.
pub fn restart(
    workspace: &Workspace,
    options: RestartOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<RestartOutcome> {
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    let mut project = resolve_project(workspace, &options.selector)?;
    let services = if options.services.is_empty() {
        project.services.keys().cloned().collect()
    } else {
        if let Some(unknown) = options
            .services
            .iter()
            .find(|name| !project.services.contains_key(name.as_str()))
        {
            return Err(Error::UnknownService {
                project: project.name.clone(),
                name: unknown.clone(),
            });
        }
        options.services
    };

    restart_services(&mut reporter, workspace, &project, &services, options.no_deps)?;
    let hosts = sync_hosts(&mut reporter, workspace, &mut project, false)?;

    drop(reporter);
    Ok(OperationOutput::new(RestartOutcome {
        project: project.name,
        services,
        hosts,
    })
    .with_events(events))
}

/// Tear the project down including its volumes, clean its hosts block and delete its
/// directory.
pub fn destroy(
    workspace: &Workspace,
    options: DestroyOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<DestroyOutcome> {
    if options.name.trim().is_empty() {
        return Err(Error::DestroyRequiresName);
    }
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    let mut project = load_named(workspace, &options.name, &[])?;
    let cancel = CancelToken::new();
    let failures = teardown(&mut reporter, workspace, &project, &cancel, Runner::destroy)?;
    if failures > 0 {
        reporter.emit(Event::warning(format!(
            "{failures} teardown step(s) failed; removing the project directory anyway."
        )));
    }
    for volume in workspace
        .backend
        .engine
        .list_volumes(&filter_labels(&project.name, None, None), &cancel)?
    {
        workspace.backend.engine.remove_volume(&volume, &cancel)?;
    }
    let hosts = sync_hosts(&mut reporter, workspace, &mut project, true)?;

    fs::remove_dir_all(&project.work_dir)
        .map_err(|source| Error::io(&project.work_dir, source, IoAction::Remove))?;
    reporter.emit(Event::info(format!(
        "Removed project directory {}",
        project.work_dir.display()
    )));

    drop(reporter);
    Ok(OperationOutput::new(DestroyOutcome {
        project: project.name,
        path: project.work_dir,
        hosts,
    })
    .with_events(events))
}

/// Write or remove a project's hosts block. Meant to run with elevated privileges after
/// another operation reported [`HostsStatus::NeedsElevation`].
///
/// [`HostsStatus::NeedsElevation`]: super::super::outcome::HostsStatus::NeedsElevation
pub fn update_hosts(
    workspace: &Workspace,
    options: HostsOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<HostsOutcome> {
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    if !is_valid_name(&options.name) {
        return Err(Error::InvalidProjectName { name: options.name });
    }
    // A destroyed project has no manifest left; cleanup only needs its name.
    let entries = if options.cleanup {
        Vec::new()
    } else {
        load_named(workspace, &options.name, &[])?.host_entries
    };
    let path = workspace.settings.hosts.file.clone();
    let changed = hosts::save(&path, &options.name, &entries)?;
    reporter.emit(Event::HostsUpdated {
        path: path.clone(),
        changed,
    });

    drop(reporter);
    Ok(OperationOutput::new(HostsOutcome { path, changed }).with_events(events))
}

/// Stop the selected services (dependents first), then start them again together with
/// their images, volumes and network.
pub(super) fn restart_services(
    reporter: &mut ReporterProxy<'_, '_>,
    workspace: &Workspace,
    project: &Project,
    services: &[String],
    no_deps: bool,
) -> Result<()> {
    reporter.emit(Event::Restarting {
        services: services.to_vec(),
    });
    let cancel = CancelToken::new();
    let runners = plan(project, SourceSync::Skip)?;

    let failures = stop_rounds(
        reporter,
        workspace,
        project,
        restrict(runners.clone(), services, false),
        &cancel,
        |runner, ctx, token| match runner.kind() {
            RunnerKind::Service | RunnerKind::Action => runner.stop(ctx, token),
            _ => Ok(()),
        },
    )?;
    if failures > 0 {
        return Err(Error::Engine {
            message: format!("{failures} service(s) could not be stopped"),
        });
    }

    start_rounds(
        reporter,
        workspace,
        project,
        restrict(runners, services, no_deps),
        &cancel,
    )
}

/// Run `step` over the project graph in reverse, then sweep containers no longer planned.
fn teardown(
    reporter: &mut ReporterProxy<'_, '_>,
    workspace: &Workspace,
    project: &Project,
    cancel: &CancelToken,
    step: fn(&Runner, &RunContext, &CancelToken) -> Result<()>,
) -> Result<usize> {
    let runners = plan(project, SourceSync::Skip)?;
    let failures = stop_rounds(reporter, workspace, project, runners, cancel, step)?;
    let leftovers = reporter.relay(|events| {
        let ctx = run_context(workspace, project).with_events(events);
        ctx.remove_containers(
            &filter_labels(&project.name, None, None),
            Duration::ZERO,
            cancel,
        )
    })?;
    if !leftovers.is_empty() {
        reporter.emit(Event::info(format!(
            "Removed leftover containers: {}",
            leftovers.join(", ")
        )));
    }
    Ok(failures)
}

fn workload_names(runners: &[Runner]) -> Vec<String> {
    runners
        .iter()
        .filter(|runner| matches!(runner.kind(), RunnerKind::Service | RunnerKind::Action))
        .map(|runner| runner.reference.clone())
        .collect()
}

fn removed_containers(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::ContainerRemoved { name } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{ContainerEngine, ContainerSpec};
    use crate::core::operations::tests::Fixture;
    use crate::core::outcome::HostsStatus;
    use crate::core::runners::make_labels;

    fn up_demo(fixture: &Fixture) -> UpOutcome {
        up(
            &fixture.workspace,
            LifecycleOptions {
                selector: fixture.selector(),
            },
            None,
        )
        .unwrap()
        .value
    }

    fn id_of(fixture: &Fixture, name: &str) -> String {
        fixture
            .engine
            .containers()
            .into_iter()
            .find(|container| container.spec.name == name)
            .map(|container| container.id)
            .unwrap()
    }

    #[test]
    fn up_starts_the_whole_project() {
        let fixture = Fixture::new();
        let outcome = up_demo(&fixture);

        assert_eq!(outcome.started, vec!["app", "db", "migrate"]);
        assert_eq!(outcome.hosts, HostsStatus::Updated);
        let mut names = fixture.engine.container_names();
        names.sort();
        assert_eq!(names, vec!["demo-app", "demo-db", "demo-migrate-0"]);

        let state = fixture.engine.state.lock().unwrap();
        assert!(state.networks.contains_key("devbox-demo"));
        assert_eq!(
            state.volumes.keys().collect::<Vec<_>>(),
            vec!["demo-cache", "demo-pgdata"]
        );
        assert_eq!(state.built[0].0, "local/service-1");
        assert!(state.pulled.contains(&"postgres:16".to_string()));
        assert!(state.pulled.contains(&"alpine:3.20.3".to_string()));
        drop(state);
        assert!(fixture.hosts().contains("127.0.0.1 app.local xn--bcher-kva.local api.local"));
    }

    #[test]
    fn second_up_keeps_running_containers() {
        let fixture = Fixture::new();
        up_demo(&fixture);
        let before = id_of(&fixture, "demo-app");
        let outcome = up(
            &fixture.workspace,
            LifecycleOptions {
                selector: fixture.selector(),
            },
            None,
        )
        .unwrap();
        assert_eq!(id_of(&fixture, "demo-app"), before);
        assert_eq!(fixture.engine.containers().len(), 3);
        assert_eq!(outcome.value.hosts, HostsStatus::Unchanged);
        assert!(
            !outcome
                .events
                .iter()
                .any(|event| matches!(event, Event::ContainerStarted { .. }))
        );
    }

    #[test]
    fn down_removes_containers_network_and_hosts_block() {
        let fixture = Fixture::new();
        up_demo(&fixture);
        fixture
            .engine
            .create_container(
                &ContainerSpec {
                    name: "demo-retired".into(),
                    image: "alpine".into(),
                    labels: make_labels("demo", RunnerKind::Service, "retired"),
                    ..ContainerSpec::default()
                },
                &CancelToken::new(),
            )
            .unwrap();

        let outcome = down(
            &fixture.workspace,
            LifecycleOptions {
                selector: fixture.selector(),
            },
            None,
        )
        .unwrap()
        .value;

        assert_eq!(outcome.failures, 0);
        assert_eq!(outcome.removed.len(), 4);
        assert!(outcome.removed.contains(&"demo-retired".to_string()));
        assert!(fixture.engine.containers().is_empty());
        let state = fixture.engine.state.lock().unwrap();
        assert!(state.networks.is_empty());
        assert_eq!(state.volumes.len(), 2);
        drop(state);
        assert_eq!(fixture.hosts(), "127.0.0.1 localhost\n");
        assert_eq!(outcome.hosts, HostsStatus::Updated);
    }

    #[test]
    fn restart_recreates_only_the_selected_service() {
        let fixture = Fixture::new();
        up_demo(&fixture);
        let app = id_of(&fixture, "demo-app");
        let db = id_of(&fixture, "demo-db");

        let outcome = restart(
            &fixture.workspace,
            RestartOptions {
                selector: fixture.selector(),
                services: vec!["app".into()],
                no_deps: false,
            },
            None,
        )
        .unwrap();

        assert_ne!(id_of(&fixture, "demo-app"), app);
        assert_eq!(id_of(&fixture, "demo-db"), db);
        assert_eq!(outcome.value.services, vec!["app"]);
        assert!(matches!(
            &outcome.events[0],
            Event::Restarting { services } if services == &vec!["app".to_string()]
        ));
        // The image is rebuilt from the checkout.
        assert_eq!(fixture.engine.state.lock().unwrap().built.len(), 2);
    }

    #[test]
    fn restart_rejects_unknown_services() {
        let fixture = Fixture::new();
        let err = restart(
            &fixture.workspace,
            RestartOptions {
                selector: fixture.selector(),
                services: vec!["ghost".into()],
                no_deps: true,
            },
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownService { name, .. } if name == "ghost"));
    }

    #[test]
    fn destroy_needs_a_name() {
        let fixture = Fixture::new();
        let err = destroy(&fixture.workspace, DestroyOptions::default(), None).unwrap_err();
        assert!(matches!(err, Error::DestroyRequiresName));
    }

    #[test]
    fn destroy_removes_volumes_and_the_project_directory() {
        let fixture = Fixture::new();
        up_demo(&fixture);
        let outcome = destroy(
            &fixture.workspace,
            DestroyOptions {
                name: "demo".into(),
            },
            None,
        )
        .unwrap()
        .value;

        assert!(!fixture.project_dir().exists());
        assert_eq!(outcome.path, fixture.project_dir());
        let state = fixture.engine.state.lock().unwrap();
        assert!(state.volumes.is_empty());
        assert!(state.containers.is_empty());
        drop(state);
        assert!(!fixture.hosts().contains("Devbox"));
    }

    #[test]
    fn update_hosts_cleanup_works_without_a_project() {
        let fixture = Fixture::new();
        hosts::save(
            &fixture.workspace.settings.hosts.file,
            "gone",
            &["127.0.0.1 gone.local".to_string()],
        )
        .unwrap();
        let outcome = update_hosts(
            &fixture.workspace,
            HostsOptions {
                name: "gone".into(),
                cleanup: true,
            },
            None,
        )
        .unwrap();
        assert!(outcome.value.changed);
        assert_eq!(fixture.hosts(), "127.0.0.1 localhost\n");
    }

    #[test]
    fn update_hosts_needs_a_valid_name() {
        let fixture = Fixture::new();
        let err = update_hosts(&fixture.workspace, HostsOptions::default(), None).unwrap_err();
        assert!(matches!(err, Error::InvalidProjectName { .. }));
        assert_eq!(fixture.hosts(), "127.0.0.1 localhost\n");
    }
}
