//! One executor per resource kind. Every runner is a dependency-graph node with
//! `start`/`stop`/`destroy`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use crate::error::{Error, IoAction, Result};

use super::cancel::CancelToken;
use super::depgraph::Node;
use super::engine::{ContainerEngine, LabelFilter, MountSpec};
use super::events::Event;
use super::process::CommandRunner;
use super::project::clean_path;

mod action;
mod build;
mod network;
mod pull;
mod service;
mod source;
mod volume;

pub use action::ActionJob;
pub use build::{BuildJob, context_archive};
pub use network::NetworkJob;
pub use pull::PullJob;
pub use service::{ServiceJob, rfc1123_hostname};
pub use source::SourceJob;
pub use volume::VolumeJob;

pub const LABEL_DEVBOX: &str = "com.devbox";
pub const LABEL_DEVBOX_PROJECT: &str = "com.devbox.project";
pub const LABEL_DEVBOX_TYPE: &str = "com.devbox.type";
pub const LABEL_DEVBOX_NAME: &str = "com.devbox.name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RunnerKind {
    Pull,
    Build,
    Volume,
    Network,
    Service,
    Action,
    Source,
}

impl RunnerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RunnerKind::Pull => "pull",
            RunnerKind::Build => "image-build",
            RunnerKind::Volume => "volume",
            RunnerKind::Network => "network",
            RunnerKind::Service => "service",
            RunnerKind::Action => "action",
            RunnerKind::Source => "source",
        }
    }
}

impl fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels stamped on every engine object devbox creates.
pub fn make_labels(project: &str, kind: RunnerKind, name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_DEVBOX.to_string(), "true".to_string()),
        (LABEL_DEVBOX_PROJECT.to_string(), project.to_string()),
        (LABEL_DEVBOX_TYPE.to_string(), kind.as_str().to_string()),
        (LABEL_DEVBOX_NAME.to_string(), name.to_string()),
    ])
}

/// Filter selecting a project's objects, optionally narrowed by kind and name.
pub fn filter_labels(project: &str, kind: Option<RunnerKind>, name: Option<&str>) -> LabelFilter {
    let mut filter = LabelFilter::new()
        .with(LABEL_DEVBOX, "true")
        .with(LABEL_DEVBOX_PROJECT, project);
    if let Some(kind) = kind {
        filter = filter.with(LABEL_DEVBOX_TYPE, kind.as_str());
    }
    if let Some(name) = name {
        filter = filter.with(LABEL_DEVBOX_NAME, name);
    }
    filter
}

/// Shared collaborators and settings for one graph execution.
pub struct RunContext {
    pub project: String,
    pub work_dir: PathBuf,
    pub network: String,
    pub engine: Arc<dyn ContainerEngine>,
    pub commands: Arc<dyn CommandRunner>,
    pub readiness_timeout: Duration,
    pub sync_timeout: Duration,
    events: Option<Sender<Event>>,
}

impl RunContext {
    pub fn new(
        project: impl Into<String>,
        work_dir: impl Into<PathBuf>,
        engine: Arc<dyn ContainerEngine>,
        commands: Arc<dyn CommandRunner>,
    ) -> Self {
        let project = project.into();
        Self {
            network: format!("devbox-{project}"),
            project,
            work_dir: work_dir.into(),
            engine,
            commands,
            readiness_timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
            sync_timeout: Duration::from_secs(crate::config::DEFAULT_TIMEOUT_SECS),
            events: None,
        }
    }

    pub fn with_timeouts(mut self, readiness: Duration, sync: Duration) -> Self {
        self.readiness_timeout = readiness;
        self.sync_timeout = sync;
        self
    }

    /// Forward runner events over `sender`; without one they are dropped.
    pub fn with_events(mut self, sender: Sender<Event>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn emit(&self, event: Event) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }

    pub fn labels(&self, kind: RunnerKind, name: &str) -> BTreeMap<String, String> {
        make_labels(&self.project, kind, name)
    }

    pub fn filter(&self, kind: RunnerKind, name: &str) -> LabelFilter {
        filter_labels(&self.project, Some(kind), Some(name))
    }

    /// Stop (ignoring failures) and remove every container matching `filter`.
    pub(crate) fn remove_containers(
        &self,
        filter: &LabelFilter,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for container in self.engine.list_containers(filter, cancel)? {
            let _ = self.engine.stop_container(&container.id, timeout, cancel);
            self.engine.remove_container(&container.id, cancel)?;
            self.emit(Event::ContainerRemoved {
                name: container.name.clone(),
            });
            removed.push(container.name);
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone)]
pub enum Job {
    Pull(PullJob),
    Build(BuildJob),
    Volume(VolumeJob),
    Network(NetworkJob),
    Service(ServiceJob),
    Action(ActionJob),
    Source(SourceJob),
}

/// A dependency-graph node bound to the work it performs.
#[derive(Debug, Clone)]
pub struct Runner {
    pub reference: String,
    pub depends_on: Vec<String>,
    pub job: Job,
}

impl Node for Runner {
    fn reference(&self) -> &str {
        &self.reference
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

impl Runner {
    pub fn new(reference: impl Into<String>, depends_on: Vec<String>, job: Job) -> Self {
        Self {
            reference: reference.into(),
            depends_on,
            job,
        }
    }

    pub fn kind(&self) -> RunnerKind {
        match &self.job {
            Job::Pull(_) => RunnerKind::Pull,
            Job::Build(_) => RunnerKind::Build,
            Job::Volume(_) => RunnerKind::Volume,
            Job::Network(_) => RunnerKind::Network,
            Job::Service(_) => RunnerKind::Service,
            Job::Action(_) => RunnerKind::Action,
            Job::Source(_) => RunnerKind::Source,
        }
    }

    /// Bring the resource up, reporting start/finish/failure events around the work.
    pub fn start(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let started = Instant::now();
        ctx.emit(Event::NodeStarted {
            kind: self.kind(),
            reference: self.reference.clone(),
        });
        let result = match &self.job {
            Job::Pull(job) => job.start(ctx, cancel),
            Job::Build(job) => job.start(ctx, cancel),
            Job::Volume(job) => job.start(ctx, cancel),
            Job::Network(job) => job.start(ctx, cancel),
            Job::Service(job) => job.start(ctx, cancel),
            Job::Action(job) => job.start(ctx, cancel),
            Job::Source(job) => job.start(ctx, cancel),
        };
        match &result {
            Ok(()) => ctx.emit(Event::NodeFinished {
                kind: self.kind(),
                reference: self.reference.clone(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            Err(Error::Cancelled) => {}
            Err(err) => ctx.emit(Event::NodeFailed {
                kind: self.kind(),
                reference: self.reference.clone(),
                error: err.to_string(),
            }),
        }
        result
    }

    /// Tear the resource down; pulled images, built images and source checkouts stay.
    pub fn stop(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        match &self.job {
            Job::Service(job) => job.stop(ctx, cancel),
            Job::Action(job) => job.stop(ctx, cancel),
            Job::Network(job) => job.stop(ctx, cancel),
            Job::Pull(_) | Job::Build(_) | Job::Volume(_) | Job::Source(_) => Ok(()),
        }
    }

    /// Like [`Runner::stop`], additionally removing named volumes.
    pub fn destroy(&self, ctx: &RunContext, cancel: &CancelToken) -> Result<()> {
        match &self.job {
            Job::Volume(job) => job.destroy(ctx, cancel),
            _ => self.stop(ctx, cancel),
        }
    }
}

/// Resolve host-path volume sources (`/abs`, `./rel`, `../rel`, `~/rel`); `None` for named
/// volumes.
pub(crate) fn host_path(source: &str, work_dir: &Path) -> Option<PathBuf> {
    if source.starts_with('/') {
        return Some(clean_path(Path::new(source)));
    }
    if source.starts_with("./") || source.starts_with("../") || source == "." {
        return Some(clean_path(&work_dir.join(source)));
    }
    if source == "~" || source.starts_with("~/") {
        return Some(crate::config::expand_path(source, work_dir));
    }
    None
}

/// Volume name of a `name[/subpath]:target` entry.
pub fn named_volume<'a>(spec: &'a str, work_dir: &Path) -> Option<&'a str> {
    let (source, _) = spec.split_once(':')?;
    if host_path(source, work_dir).is_some() {
        return None;
    }
    source.split('/').next().filter(|name| !name.is_empty())
}

/// Engine mounts for volume strings.
///
/// One token is an anonymous volume on the target; two tokens are a bind mount when the
/// source is a host path, otherwise a named volume whose remainder after the first `/` is a
/// subpath. Anything else is rejected.
pub fn get_mounts(volumes: &[String], project: &str, work_dir: &Path) -> Result<Vec<MountSpec>> {
    volumes
        .iter()
        .map(|spec| {
            let parts: Vec<&str> = spec.split(':').collect();
            match parts.as_slice() {
                [target] if !target.is_empty() => Ok(MountSpec::Volume {
                    source: None,
                    target: target.to_string(),
                    subpath: None,
                }),
                [source, target] if !source.is_empty() && !target.is_empty() => {
                    if let Some(path) = host_path(source, work_dir) {
                        return Ok(MountSpec::Bind {
                            source: path.to_string_lossy().into_owned(),
                            target: target.to_string(),
                        });
                    }
                    let (name, subpath) = match source.split_once('/') {
                        Some((name, rest)) => {
                            (name, Some(rest.trim_matches('/').to_string()).filter(|s| !s.is_empty()))
                        }
                        None => (*source, None),
                    };
                    Ok(MountSpec::Volume {
                        source: Some(volume_name(project, name)),
                        target: target.to_string(),
                        subpath,
                    })
                }
                _ => Err(Error::InvalidVolumeSpec { spec: spec.clone() }),
            }
        })
        .collect()
}

/// Engine name of a project volume.
pub fn volume_name(project: &str, name: &str) -> String {
    format!("{project}-{name}")
}

/// Inline environment followed by every env-file entry; blank lines and comments are skipped.
pub fn get_envs(environment: &[String], env_files: &[String], work_dir: &Path) -> Result<Vec<String>> {
    let mut env = environment.to_vec();
    for file in env_files {
        let path = host_path(file, work_dir).unwrap_or_else(|| work_dir.join(file));
        let contents =
            fs::read_to_string(&path).map_err(|source| Error::io(&path, source, IoAction::Read))?;
        env.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    Ok(env)
}

/// Wait until `done` accepts the inspected state, sleeping `backoff(attempt)` between polls.
///
/// Returns `Ok(false)` when `deadline` fires first; `Err(Cancelled)` only when `cancel` does.
pub(crate) fn poll_until<F, B>(
    ctx: &RunContext,
    id: &str,
    deadline: Duration,
    cancel: &CancelToken,
    mut done: F,
    backoff: B,
) -> Result<bool>
where
    F: FnMut(&super::engine::ContainerState) -> Result<bool>,
    B: Fn(u32) -> Duration,
{
    let timer = cancel.with_timeout(deadline);
    let mut attempt = 0;
    loop {
        cancel.check()?;
        let state = ctx.engine.inspect_container(id, cancel)?;
        if done(&state)? {
            return Ok(true);
        }
        if timer.sleep(backoff(attempt)).is_err() {
            cancel.check()?;
            return Ok(false);
        }
        attempt += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::engine::fake::FakeEngine;
    use crate::core::process::testing::ScriptedRunner;

    pub(crate) fn context(engine: &Arc<FakeEngine>) -> RunContext {
        RunContext::new(
            "demo",
            "/work/demo",
            engine.clone(),
            Arc::new(ScriptedRunner::new()),
        )
        .with_timeouts(Duration::from_millis(300), Duration::from_secs(5))
    }

    #[test]
    fn mounts_follow_token_rules() {
        let work_dir = Path::new("/work/demo");
        let mounts = get_mounts(
            &[
                "/data".to_string(),
                "/abs/src:/app".to_string(),
                "./config:/config".to_string(),
                "cache/app/:/cache".to_string(),
                "pgdata:/var/lib/postgresql/data".to_string(),
            ],
            "demo",
            work_dir,
        )
        .unwrap();

        assert_eq!(
            mounts,
            vec![
                MountSpec::Volume {
                    source: None,
                    target: "/data".into(),
                    subpath: None
                },
                MountSpec::Bind {
                    source: "/abs/src".into(),
                    target: "/app".into()
                },
                MountSpec::Bind {
                    source: "/work/demo/config".into(),
                    target: "/config".into()
                },
                MountSpec::Volume {
                    source: Some("demo-cache".into()),
                    target: "/cache".into(),
                    subpath: Some("app".into())
                },
                MountSpec::Volume {
                    source: Some("demo-pgdata".into()),
                    target: "/var/lib/postgresql/data".into(),
                    subpath: None
                },
            ]
        );
    }

    #[test]
    fn three_token_volumes_are_rejected() {
        let err = get_mounts(&["./src:/app:ro".to_string()], "demo", Path::new("/w")).unwrap_err();
        assert!(matches!(err, Error::InvalidVolumeSpec { spec } if spec == "./src:/app:ro"));
    }

    #[test]
    fn named_volume_detection() {
        let work_dir = Path::new("/w");
        assert_eq!(named_volume("cache/app:/cache", work_dir), Some("cache"));
        assert_eq!(named_volume("./cache:/cache", work_dir), None);
        assert_eq!(named_volume("/cache:/cache", work_dir), None);
        assert_eq!(named_volume("/cache", work_dir), None);
    }

    #[test]
    fn env_files_are_appended_without_blank_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("app.env"), "A=1\n\n  # comment\nB=2  \n").unwrap();
        let env = get_envs(
            &["MODE=dev".to_string()],
            &["./app.env".to_string()],
            dir.path(),
        )
        .unwrap();
        assert_eq!(env, vec!["MODE=dev", "A=1", "B=2"]);
    }

    #[test]
    fn labels_and_filters_agree() {
        let labels = make_labels("demo", RunnerKind::Service, "app");
        assert!(filter_labels("demo", Some(RunnerKind::Service), Some("app")).matches(&labels));
        assert!(filter_labels("demo", None, None).matches(&labels));
        assert!(!filter_labels("demo", Some(RunnerKind::Action), None).matches(&labels));
        assert_eq!(labels[LABEL_DEVBOX_TYPE], "service");
    }

    #[test]
    fn runner_reports_start_and_failure_events() {
        let engine = Arc::new(FakeEngine::new());
        engine
            .state
            .lock()
            .unwrap()
            .failing_pulls
            .insert("ghost:1".into());
        let (tx, rx) = std::sync::mpsc::channel();
        let ctx = context(&engine).with_events(tx);

        let runner = Runner::new("ghost:1", Vec::new(), Job::Pull(PullJob::new("ghost:1")));
        let err = runner.start(&ctx, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::ImagePullFailed { .. }));
        drop(ctx);

        let events: Vec<Event> = rx.iter().collect();
        assert!(matches!(events[0], Event::NodeStarted { kind: RunnerKind::Pull, .. }));
        assert!(matches!(events.last(), Some(Event::NodeFailed { .. })));
    }
}
