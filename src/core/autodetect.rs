//! Work out which project, and which of its sources, the current directory belongs to.
//!
//! Projects are matched in a fixed order: an explicit name, then local mounts, then source
//! remotes, then the manifest repository remote. The first step producing a match wins; a
//! step matching more than one project is an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};

use super::cancel::CancelToken;
use super::diagnostics::Diagnostic;
use super::git::Git;
use super::manifest::find_manifest;
use super::mount::normalize_source_path;
use super::process::CommandRunner;
use super::project::{Project, Source, clean_path};
use super::url::same_repository;

/// What the caller intends to do with a detected source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountIntent {
    /// The source must not be mounted yet.
    Mount,
    /// The source must be mounted.
    Umount,
    Any,
}

/// Source found for the current directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMatch {
    /// `./sources/<name>[/<sparse path>]`.
    pub source_path: String,
    /// Host directory that replaces the source path when mounted.
    pub local_path: PathBuf,
}

/// Remote and top level of the repository containing `cwd`, when there is one.
struct CwdRepository {
    remote: String,
    top_level: PathBuf,
}

impl CwdRepository {
    fn detect(cwd: &Path, commands: &Arc<dyn CommandRunner>, cancel: &CancelToken) -> Option<Self> {
        let git = Git::new(commands.clone(), cwd);
        let remote = git.remote_url(cancel).ok()?;
        let top_level = git.top_level(cancel).ok()?;
        Some(Self { remote, top_level })
    }

    fn relative<'a>(&self, cwd: &'a Path) -> &'a Path {
        cwd.strip_prefix(&self.top_level).unwrap_or(Path::new(""))
    }
}

/// Load every project installed under `app_dir`, sorted by name.
///
/// Directories without a manifest or failing to load are reported as diagnostics.
pub fn installed_projects(app_dir: &Path, profiles: &[String]) -> (Vec<Project>, Vec<Diagnostic>) {
    let mut projects = Vec::new();
    let mut diagnostics = Vec::new();
    let Ok(entries) = fs::read_dir(app_dir) else {
        return (projects, diagnostics);
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| !name.starts_with('.'))
        })
        .collect();
    dirs.sort();

    for dir in dirs {
        let Some(name) = dir.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if find_manifest(&dir).is_err() {
            diagnostics.push(
                Diagnostic::warning(format!("Skipping `{name}`: no manifest found."))
                    .with_path(dir.clone()),
            );
            continue;
        }
        match Project::load(app_dir, name, profiles) {
            Ok(project) => projects.push(project),
            Err(err) => diagnostics.push(
                Diagnostic::warning(format!("Skipping `{name}`: {err}")).with_path(dir.clone()),
            ),
        }
    }
    (projects, diagnostics)
}

/// Pick the project meant by `name`, or by `cwd` when no name is given.
pub fn detect_project<'p>(
    projects: &'p [Project],
    name: Option<&str>,
    cwd: &Path,
    commands: &Arc<dyn CommandRunner>,
    cancel: &CancelToken,
) -> Result<&'p Project> {
    if let Some(name) = name {
        return projects
            .iter()
            .find(|project| project.name == name)
            .ok_or_else(|| Error::UnknownProject {
                name: Some(name.to_string()),
            });
    }

    let by_mount = single(
        projects
            .iter()
            .filter(|project| {
                project
                    .local_mounts()
                    .values()
                    .any(|local| mounted_at(local, cwd))
            })
            .collect(),
    )?;
    if let Some(project) = by_mount {
        return Ok(project);
    }

    let Some(repo) = CwdRepository::detect(cwd, commands, cancel) else {
        return Err(Error::UnknownProject { name: None });
    };
    let relative = repo.relative(cwd);

    let by_source = single(
        projects
            .iter()
            .filter(|project| {
                project
                    .sources
                    .values()
                    .any(|source| source_path_for(source, &repo.remote, relative).is_some())
            })
            .collect(),
    )?;
    if let Some(project) = by_source {
        return Ok(project);
    }

    let by_manifest = single(
        projects
            .iter()
            .filter(|project| {
                Git::new(commands.clone(), &project.work_dir)
                    .remote_url(cancel)
                    .is_ok_and(|remote| same_repository(&remote, &repo.remote))
            })
            .collect(),
    )?;
    by_manifest.ok_or(Error::UnknownProject { name: None })
}

/// A local mount only claims the directory it points at, not its subdirectories.
fn mounted_at(local: &str, cwd: &Path) -> bool {
    clean_path(Path::new(local)) == clean_path(cwd)
}

fn single(matches: Vec<&Project>) -> Result<Option<&Project>> {
    match matches.as_slice() {
        [] => Ok(None),
        [project] => Ok(Some(*project)),
        many => Err(Error::AmbiguousProject {
            candidates: many.iter().map(|project| project.name.clone()).collect(),
        }),
    }
}

/// Source path of `source` that covers `relative` inside a checkout of `remote`.
///
/// Sparse sources match only below one of their sparse paths, the longest one winning; `.`
/// stands for the repository root.
fn source_path_for(source: &Source, remote: &str, relative: &Path) -> Option<(String, PathBuf)> {
    if !same_repository(&source.url, remote) {
        return None;
    }
    if source.sparse_checkout.is_empty() {
        return Some((source.relative_path(), PathBuf::new()));
    }
    source
        .sparse_checkout
        .iter()
        .map(|sparse| sparse.trim().trim_start_matches("./").trim_matches('/'))
        .filter(|sparse| *sparse == "." || sparse.is_empty() || relative.starts_with(sparse))
        .max_by_key(|sparse| if *sparse == "." { 0 } else { sparse.len() })
        .map(|sparse| match sparse {
            "." | "" => (source.relative_path(), PathBuf::new()),
            sparse => (
                format!("{}/{sparse}", source.relative_path()),
                PathBuf::from(sparse),
            ),
        })
}

/// Find the source of `project` that `cwd` is a working copy of, honouring `intent`.
pub fn detect_source(
    project: &Project,
    cwd: &Path,
    intent: MountIntent,
    commands: &Arc<dyn CommandRunner>,
    cancel: &CancelToken,
) -> Result<SourceMatch> {
    let mounted: Vec<SourceMatch> = project
        .local_mounts()
        .iter()
        .filter(|(_, local)| mounted_at(local, cwd))
        .map(|(source_path, local)| SourceMatch {
            source_path: source_path.clone(),
            local_path: PathBuf::from(local),
        })
        .collect();

    let found = if !mounted.is_empty() {
        mounted
    } else {
        let repo = CwdRepository::detect(cwd, commands, cancel);
        repo.map(|repo| {
            let relative = repo.relative(cwd);
            project
                .sources
                .values()
                .filter_map(|source| source_path_for(source, &repo.remote, relative))
                .map(|(source_path, subdir)| SourceMatch {
                    source_path,
                    local_path: repo.top_level.join(subdir),
                })
                .collect()
        })
        .unwrap_or_default()
    };

    let found = match found.as_slice() {
        [] => {
            return Err(Error::UnknownSource {
                project: project.name.clone(),
                source_path: cwd.display().to_string(),
            });
        }
        [found] => found.clone(),
        many => {
            return Err(Error::AmbiguousSource {
                candidates: many.iter().map(|m| m.source_path.clone()).collect(),
            });
        }
    };

    check_intent(project, &found.source_path, intent)?;
    Ok(found)
}

/// Resolve an explicitly named source path and check it against `intent`.
pub fn explicit_source(project: &Project, input: &str, intent: MountIntent) -> Result<String> {
    let source_path = normalize_source_path(input);
    super::mount::validate_source_path(project, &source_path)?;
    check_intent(project, &source_path, intent)?;
    Ok(source_path)
}

fn check_intent(project: &Project, source_path: &str, intent: MountIntent) -> Result<()> {
    let mounted = project.local_mounts().get(source_path);
    match (intent, mounted) {
        (MountIntent::Mount, Some(local)) => Err(Error::AlreadyMounted {
            source_path: source_path.to_string(),
            local: local.clone(),
        }),
        (MountIntent::Umount, None) => Err(Error::NotMounted {
            source_path: source_path.to_string(),
        }),
        _ => Ok(()),
    }
}
