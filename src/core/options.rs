use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{self, Settings};
use crate::error::{Error, Result};

use super::engine::{ContainerEngine, DockerCli};
use super::process::{CommandRunner, SystemRunner};

/// External collaborators used by operations: the container engine and the subprocess runner.
#[derive(Clone)]
pub struct Backend {
    pub engine: Arc<dyn ContainerEngine>,
    pub commands: Arc<dyn CommandRunner>,
}

impl Backend {
    /// Host subprocesses and the engine CLI named in `settings`.
    pub fn system(settings: &Settings) -> Self {
        let commands: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
        Self {
            engine: Arc::new(DockerCli::new(commands.clone(), &settings.engine.binary)),
            commands,
        }
    }
}

/// Where projects live, the user's settings and the backend to act through.
#[derive(Clone)]
pub struct Workspace {
    pub app_dir: PathBuf,
    pub settings: Settings,
    pub backend: Backend,
}

impl Workspace {
    /// Resolve the application directory and its settings from the environment.
    pub fn from_env() -> Result<Self> {
        let app_dir = config::app_dir()?;
        let settings = Settings::load(&app_dir)?;
        Ok(Self {
            backend: Backend::system(&settings),
            app_dir,
            settings,
        })
    }

    pub fn new(app_dir: impl Into<PathBuf>, settings: Settings, backend: Backend) -> Self {
        Self {
            app_dir: app_dir.into(),
            settings,
            backend,
        }
    }
}

/// How an operation picks its project.
#[derive(Debug, Clone, Default)]
pub struct ProjectSelector {
    /// Explicit project name (`-n`); detection from `cwd` otherwise.
    pub name: Option<String>,
    pub cwd: PathBuf,
    /// Compose profiles enabling optional services.
    pub profiles: Vec<String>,
}

impl ProjectSelector {
    /// Select by `name` or detect from the process working directory.
    pub fn current(name: Option<String>, profiles: Vec<String>) -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|source| Error::WorkingDirectoryUnavailable { source })?;
        Ok(Self {
            name,
            cwd,
            profiles,
        })
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Options accepted by the `init` operation.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Manifest repository URL.
    pub url: String,
    /// Project name; guessed from the URL when absent.
    pub name: Option<String>,
    pub branch: Option<String>,
}

/// Options for `up` and `down`.
#[derive(Debug, Clone, Default)]
pub struct LifecycleOptions {
    pub selector: ProjectSelector,
}

#[derive(Debug, Clone, Default)]
pub struct RestartOptions {
    pub selector: ProjectSelector,
    /// Services to restart; every service when empty.
    pub services: Vec<String>,
    /// Skip image, volume and network nodes.
    pub no_deps: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InfoOptions {
    pub selector: ProjectSelector,
}

#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub selector: ProjectSelector,
    /// Services to show; every service container when empty.
    pub services: Vec<String>,
    pub follow: bool,
    pub tail: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ShellOptions {
    pub selector: ProjectSelector,
    /// Service to enter; detected from the current source checkout when absent.
    pub service: Option<String>,
    pub bash: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    pub selector: ProjectSelector,
    /// Source path (`./sources/<name>[/...]` or a bare name); detected when absent.
    pub source: Option<String>,
    /// Local checkout; the detected repository directory or `cwd` when absent.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UmountOptions {
    pub selector: ProjectSelector,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub selector: ProjectSelector,
    pub scenario: String,
    /// Extra arguments appended to the scenario command.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct HostsOptions {
    pub name: String,
    /// Remove the project's block instead of writing it.
    pub cleanup: bool,
}
