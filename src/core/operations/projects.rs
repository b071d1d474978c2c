use std::fs;
use std::path::Path;

use crate::error::{Error, IoAction, Result};

use super::super::autodetect::installed_projects;
use super::super::cancel::CancelToken;
use super::super::events::Event;
use super::super::git::{CommitInfo, Git, clone_hint};
use super::super::mount::source_name_of;
use super::super::options::{InfoOptions, InitOptions, LifecycleOptions, Workspace};
use super::super::outcome::{
    InfoOutcome, InitOutcome, ListOutcome, OperationOutput, OperationResult, ProjectSummary,
    ScenarioInfo, SourceInfo,
};
use super::super::planner::{SourceSync, plan};
use super::super::project::{ENV_FILE_NAME, Project};
use super::super::reporter::Reporter;
use super::super::runners::RunnerKind;
use super::super::state::STATE_FILE_NAME;
use super::{ReporterProxy, resolve_project, start_rounds};

/// Clone a manifest repository into `<app-dir>/<name>` and prepare it for use.
pub fn init(
    workspace: &Workspace,
    options: InitOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<InitOutcome> {
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    let name = match options.name.filter(|name| !name.is_empty()) {
        Some(name) => name,
        None => guess_name(&options.url),
    };
    if !is_valid_name(&name) {
        return Err(Error::InvalidProjectName { name });
    }
    let path = workspace.app_dir.join(&name);
    if path.exists() {
        return Err(Error::AlreadyInitialized { name, path });
    }
    fs::create_dir_all(&workspace.app_dir)
        .map_err(|source| Error::io(&workspace.app_dir, source, IoAction::CreateDir))?;

    reporter.emit(Event::info(format!("Cloning {} into {}", options.url, path.display())));
    let result = prepare(workspace, &name, &path, &options.url, options.branch.as_deref());
    if let Err(err) = result {
        if path.exists() {
            let _ = fs::remove_dir_all(&path);
        }
        return Err(err);
    }
    reporter.emit(Event::info(format!("Project `{name}` is ready.")));

    drop(reporter);
    Ok(OperationOutput::new(InitOutcome {
        project: name,
        path,
    })
    .with_events(events))
}

fn prepare(
    workspace: &Workspace,
    name: &str,
    path: &Path,
    url: &str,
    branch: Option<&str>,
) -> Result<()> {
    let git = Git::new(workspace.backend.commands.clone(), path);
    git.clone_repo(url, branch, &CancelToken::new())
        .map_err(|source| match source {
            Error::Cancelled => Error::Cancelled,
            source => Error::GitCloneFailed {
                url: url.to_string(),
                hint: clone_hint(branch),
                source: Box::new(source),
            },
        })?;

    let env_file = path.join(ENV_FILE_NAME);
    if !env_file.exists() {
        fs::write(&env_file, "").map_err(|source| Error::io(&env_file, source, IoAction::Write))?;
    }
    let state_pattern = format!("/{STATE_FILE_NAME}");
    let env_pattern = format!("/{ENV_FILE_NAME}");
    git.set_local_exclude(&["/sources/", &state_pattern, &env_pattern])?;

    // Reject checkouts that are not devbox projects.
    Project::load(&workspace.app_dir, name, &[]).map(drop)
}

/// `acme-dev` from `git@github.com:acme/acme-dev.git`.
fn guess_name(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

pub(super) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Pull the manifest repository and every source checkout, then describe the project.
pub fn update(
    workspace: &Workspace,
    options: LifecycleOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<InfoOutcome> {
    let mut events = Vec::new();
    let mut reporter = ReporterProxy::new(reporter, &mut events);

    let mut project = resolve_project(workspace, &options.selector)?;
    let cancel = CancelToken::new();

    reporter.emit(Event::info(format!("Updating manifest of `{}`", project.name)));
    Git::new(workspace.backend.commands.clone(), &project.work_dir)
        .pull(&cancel.with_timeout(workspace.settings.timeouts.sync()))
        .map_err(|source| match source {
            Error::Cancelled if cancel.is_cancelled() => Error::Cancelled,
            source => Error::GitSyncFailed {
                path: project.work_dir.clone(),
                source: Box::new(source),
            },
        })?;
    project.reload()?;

    let sources = plan(&project, SourceSync::All)?
        .into_iter()
        .filter(|runner| runner.kind() == RunnerKind::Source)
        .collect();
    start_rounds(&mut reporter, workspace, &project, sources, &cancel)?;

    let info = describe(workspace, &project);
    drop(reporter);
    Ok(OperationOutput::new(info).with_events(events))
}

/// Describe the project: manifest and source commits, mounts, scenarios and hosts.
pub fn info(
    workspace: &Workspace,
    options: InfoOptions,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<InfoOutcome> {
    let mut events = Vec::new();
    let reporter = ReporterProxy::new(reporter, &mut events);

    let project = resolve_project(workspace, &options.selector)?;
    let info = describe(workspace, &project);

    drop(reporter);
    Ok(OperationOutput::new(info).with_events(events))
}

/// Every installed project with its manifest commit. Directories that fail to load are
/// returned as diagnostics.
pub fn list(
    workspace: &Workspace,
    reporter: Option<&mut dyn Reporter>,
) -> OperationResult<ListOutcome> {
    let mut events = Vec::new();
    let reporter = ReporterProxy::new(reporter, &mut events);

    let (projects, diagnostics) = installed_projects(&workspace.app_dir, &[]);
    let cancel = CancelToken::new();
    let projects = projects
        .into_iter()
        .map(|project| ProjectSummary {
            commit: checkout_commit(workspace, &project.work_dir, &cancel),
            name: project.name,
            path: project.work_dir,
        })
        .collect();

    drop(reporter);
    Ok(OperationOutput::new(ListOutcome { projects })
        .with_diagnostics(diagnostics)
        .with_events(events))
}

/// Last commit of the git checkout at `dir`; `None` for plain directories.
fn checkout_commit(workspace: &Workspace, dir: &Path, cancel: &CancelToken) -> Option<CommitInfo> {
    if !dir.join(".git").exists() {
        return None;
    }
    Git::new(workspace.backend.commands.clone(), dir)
        .info(cancel)
        .ok()
}

fn describe(workspace: &Workspace, project: &Project) -> InfoOutcome {
    let cancel = CancelToken::new();
    let commit_of = |dir: &Path| checkout_commit(workspace, dir, &cancel);

    let sources = project
        .sources
        .values()
        .map(|source| {
            let path = project.source_dir(&source.name);
            SourceInfo {
                name: source.name.clone(),
                url: source.url.clone(),
                branch: source.branch.clone(),
                mounts: project
                    .local_mounts()
                    .iter()
                    .filter(|(source_path, _)| source_name_of(source_path) == Some(source.name.as_str()))
                    .map(|(source_path, local)| (source_path.clone(), local.clone()))
                    .collect(),
                commit: commit_of(&path),
                path,
            }
        })
        .collect();

    InfoOutcome {
        project: project.name.clone(),
        path: project.work_dir.clone(),
        manifest_commit: commit_of(&project.work_dir),
        sources,
        scenarios: project
            .scenarios
            .values()
            .map(|scenario| ScenarioInfo {
                name: scenario.name.clone(),
                service: scenario.service.clone(),
                description: scenario.description.clone(),
            })
            .collect(),
        host_entries: project.host_entries.clone(),
        cert_domains: project
            .cert
            .as_ref()
            .map(|cert| cert.domains.clone())
            .unwrap_or_default(),
    }
}
