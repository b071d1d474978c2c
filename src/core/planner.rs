//! Turn a loaded project into dependency-graph runners.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

use super::project::{Project, SOURCES_DIR};
use super::runners::{
    ActionJob, BuildJob, Job, NetworkJob, PullJob, Runner, RunnerKind, ServiceJob, SourceJob,
    VolumeJob, named_volume,
};

/// Which source checkouts get a synchronisation node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceSync {
    /// Only sources that have no checkout yet.
    #[default]
    Missing,
    /// Every declared source.
    All,
    /// None.
    Skip,
}

pub fn network_ref(network: &str) -> String {
    format!("network:{network}")
}

pub fn volume_ref(name: &str) -> String {
    format!("volume:{name}")
}

pub fn source_ref(name: &str) -> String {
    format!("source:{name}")
}

/// Pulled and built images share this namespace; a service may carry its image's name.
pub fn image_ref(image: &str) -> String {
    format!("image:{image}")
}

/// Every runner needed to bring `project` up, in a stable order.
pub fn plan(project: &Project, sources: SourceSync) -> Result<Vec<Runner>> {
    let network = project.network_name();
    let mut runners = vec![Runner::new(
        network_ref(&network),
        Vec::new(),
        Job::Network(NetworkJob::new(&network)),
    )];

    let mut planned_sources = HashSet::new();
    for source in project.sources.values() {
        let dir = project.source_dir(&source.name);
        let wanted = match sources {
            SourceSync::All => true,
            SourceSync::Missing => !dir.join(".git").exists(),
            SourceSync::Skip => false,
        };
        if !wanted {
            continue;
        }
        planned_sources.insert(source.name.clone());
        runners.push(Runner::new(
            source_ref(&source.name),
            Vec::new(),
            Job::Source(SourceJob::new(source.clone(), dir)),
        ));
    }

    let containers = project.containers();
    let internal: BTreeSet<&str> = containers.iter().map(|def| def.image.as_str()).collect();
    let mut pulls: BTreeSet<String> = BTreeSet::new();

    for def in &containers {
        let mut depends_on = Vec::new();
        for base in base_images(&def.dockerfile) {
            if !internal.contains(base.as_str()) {
                pulls.insert(base.clone());
            }
            let reference = image_ref(&base);
            if base != def.image && !depends_on.contains(&reference) {
                depends_on.push(reference);
            }
        }
        if let Some(name) = source_of(project, &def.context) {
            if planned_sources.contains(name) {
                depends_on.push(source_ref(name));
            }
        }
        runners.push(Runner::new(
            image_ref(&def.image),
            depends_on,
            Job::Build(BuildJob {
                image: def.image.clone(),
                context: def.context.clone(),
                dockerfile: def.dockerfile.clone(),
            }),
        ));
    }

    let images = project
        .services
        .values()
        .map(|service| service.image.as_str())
        .chain(project.actions.values().map(|action| action.image.as_str()));
    for image in images {
        if !internal.contains(image) {
            pulls.insert(image.to_string());
        }
    }
    for image in pulls {
        runners.push(Runner::new(
            image_ref(&image),
            Vec::new(),
            Job::Pull(PullJob::new(image)),
        ));
    }

    let volume_specs = project
        .services
        .values()
        .flat_map(|service| service.volumes.iter())
        .chain(project.actions.values().flat_map(|action| action.volumes.iter()));
    let volumes: BTreeSet<&str> = volume_specs
        .filter_map(|spec| named_volume(spec, &project.work_dir))
        .collect();
    for name in volumes {
        runners.push(Runner::new(
            volume_ref(name),
            Vec::new(),
            Job::Volume(VolumeJob::new(name)),
        ));
    }

    let known: BTreeSet<&str> = project
        .services
        .keys()
        .chain(project.actions.keys())
        .map(String::as_str)
        .collect();

    for service in project.services.values() {
        let depends_on = entity_deps(
            project,
            &service.name,
            &service.depends_on,
            &service.image,
            &service.volumes,
            &known,
        )?;
        runners.push(Runner::new(
            service.name.clone(),
            depends_on,
            Job::Service(ServiceJob::new(service.clone())),
        ));
    }
    for action in project.actions.values() {
        let depends_on = entity_deps(
            project,
            &action.name,
            &action.depends_on,
            &action.image,
            &action.volumes,
            &known,
        )?;
        runners.push(Runner::new(
            action.name.clone(),
            depends_on,
            Job::Action(ActionJob::new(action.clone())),
        ));
    }

    Ok(runners)
}

fn entity_deps(
    project: &Project,
    name: &str,
    declared: &[String],
    image: &str,
    volumes: &[String],
    known: &BTreeSet<&str>,
) -> Result<Vec<String>> {
    let mut deps = Vec::with_capacity(declared.len() + 2 + volumes.len());
    for dependency in declared {
        if !known.contains(dependency.as_str()) {
            return Err(Error::UnknownDependency {
                entity: name.to_string(),
                dependency: dependency.clone(),
            });
        }
        deps.push(dependency.clone());
    }
    deps.push(image_ref(image));
    deps.push(network_ref(&project.network_name()));
    for volume in volumes {
        if let Some(volume) = named_volume(volume, &project.work_dir) {
            let reference = volume_ref(volume);
            if !deps.contains(&reference) {
                deps.push(reference);
            }
        }
    }
    Ok(deps)
}

/// Name of the source whose checkout holds `context`, if any.
fn source_of<'a>(project: &'a Project, context: &Path) -> Option<&'a str> {
    let sources_dir = project.work_dir.join(SOURCES_DIR);
    project
        .sources
        .keys()
        .find(|name| context.starts_with(sources_dir.join(name.as_str())))
        .map(String::as_str)
}

/// Keep the runners of `selected` services and actions.
///
/// Without `no_deps` their image, volume and network nodes are kept too; dependencies on
/// unselected services, actions and sources are dropped so the subgraph stands alone.
pub fn restrict(runners: Vec<Runner>, selected: &[String], no_deps: bool) -> Vec<Runner> {
    let is_selected = |runner: &Runner| {
        matches!(runner.kind(), RunnerKind::Service | RunnerKind::Action)
            && selected.contains(&runner.reference)
    };

    let mut keep: BTreeSet<String> = runners
        .iter()
        .filter(|runner| is_selected(runner))
        .map(|runner| runner.reference.clone())
        .collect();

    if !no_deps {
        let infra = |runner: &Runner| {
            matches!(
                runner.kind(),
                RunnerKind::Pull | RunnerKind::Build | RunnerKind::Volume | RunnerKind::Network
            )
        };
        let mut frontier: Vec<String> = runners
            .iter()
            .filter(|runner| is_selected(runner))
            .flat_map(|runner| runner.depends_on.clone())
            .collect();
        while let Some(reference) = frontier.pop() {
            for runner in runners
                .iter()
                .filter(|runner| runner.reference == reference && infra(runner))
            {
                if keep.insert(runner.reference.clone()) {
                    frontier.extend(runner.depends_on.iter().cloned());
                }
            }
        }
    }

    runners
        .into_iter()
        .filter(|runner| keep.contains(&runner.reference) && (is_selected(runner) || !no_deps))
        .filter(|runner| {
            !matches!(runner.kind(), RunnerKind::Service | RunnerKind::Action) || is_selected(runner)
        })
        .map(|mut runner| {
            if no_deps {
                runner.depends_on.clear();
            } else {
                runner.depends_on.retain(|dep| keep.contains(dep));
            }
            runner
        })
        .collect()
}

fn from_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^\s*from\s+(?:--\S+\s+)*(\S+)(?:\s+as\s+(\S+))?").ok())
        .as_ref()
}

/// External base images of a Dockerfile, skipping `scratch`, earlier stage names and
/// references built from build arguments. A missing file yields nothing.
pub fn base_images(dockerfile: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(dockerfile) else {
        return Vec::new();
    };
    parse_base_images(&contents)
}

fn parse_base_images(contents: &str) -> Vec<String> {
    let mut stages: Vec<String> = Vec::new();
    let mut images: Vec<String> = Vec::new();
    let Some(pattern) = from_pattern() else {
        return images;
    };
    for line in contents.lines() {
        let Some(captures) = pattern.captures(line) else {
            continue;
        };
        let image = &captures[1];
        let known_stage = stages.iter().any(|stage| stage.eq_ignore_ascii_case(image));
        if !known_stage
            && !image.eq_ignore_ascii_case("scratch")
            && !image.contains('$')
            && !images.iter().any(|seen| seen == image)
        {
            images.push(image.to_string());
        }
        if let Some(alias) = captures.get(2) {
            stages.push(alias.as_str().to_string());
        }
    }
    images
}
