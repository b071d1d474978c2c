use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid project name `{name}`: only letters, digits, `-` and `_` are allowed.")]
    InvalidProjectName { name: String },
    #[error("Project `{name}` already exists at {path}.")]
    AlreadyInitialized { name: String, path: PathBuf },
    #[error("Unknown scenario `{name}` in project `{project}`.")]
    UnknownScenario { project: String, name: String },
    #[error("{}", describe_unknown_project(.name.as_deref()))]
    UnknownProject { name: Option<String> },
    #[error(
        "Ambiguous project: the current directory matches {}. Please specify the project name with -n.",
        .candidates.join(", ")
    )]
    AmbiguousProject { candidates: Vec<String> },
    #[error(
        "Ambiguous source: the current directory matches {}. Please specify the source with -s.",
        .candidates.join(", ")
    )]
    AmbiguousSource { candidates: Vec<String> },
    #[error("Unknown source `{source_path}` in project `{project}`.")]
    UnknownSource { project: String, source_path: String },
    #[error("Unknown service `{name}` in project `{project}`.")]
    UnknownService { project: String, name: String },
    #[error("`{entity}` depends on unknown service or action `{dependency}`.")]
    UnknownDependency { entity: String, dependency: String },
    #[error(
        "Dependency graph cannot be ordered; cyclic or unresolved references remain for: {}.",
        .pending.join(", ")
    )]
    CyclicOrUnresolved { pending: Vec<String> },
    #[error("Unexpected `git log` output: {output:?}")]
    MalformedCommitInfo { output: String },
    #[error("Invalid volume format: {spec}")]
    InvalidVolumeSpec { spec: String },
    #[error("State file at {path} is corrupt: {source}")]
    StateFileCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to pull image {image}")]
    ImagePullFailed {
        image: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Failed to build image {image}")]
    BuildFailed {
        image: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Failed to create container {name}")]
    ContainerCreateFailed {
        name: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Failed to start container {name}")]
    ContainerStartFailed {
        name: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Container {name} did not become ready within {waited_secs}s.")]
    ReadinessTimeout { name: String, waited_secs: u64 },
    #[error("Action container {name} did not finish within {waited_secs}s.")]
    ActionTimeout { name: String, waited_secs: u64 },
    #[error("last command \"{command}\" failed with exit code {code}")]
    ActionNonZeroExit { command: String, code: i64 },
    #[error("Failed to clone {url}. {hint}")]
    GitCloneFailed {
        url: String,
        hint: String,
        #[source]
        source: Box<Error>,
    },
    #[error("Failed to sync sources at {path}")]
    GitSyncFailed {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
    #[error("No `origin` remote configured for {path}.")]
    GitRemoteMissing { path: PathBuf },
    #[error("Project directory {path} does not exist.")]
    MissingProjectDir { path: PathBuf },
    #[error("Permission denied while accessing {path}: {source}")]
    PermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No manifest found in {dir} (expected devbox.yaml, docker-compose.yml or compose.yaml).")]
    ManifestNotFound { dir: PathBuf },
    #[error("Manifest at {path} could not be parsed: {source}")]
    ParseManifest {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Manifest at {path} is invalid: {message}")]
    InvalidManifest { path: PathBuf, message: String },
    #[error("Failed to read settings file at {path}: {source}")]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Settings at {path} could not be parsed: {source}")]
    ParseSettings {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to remove {path}: {source}")]
    RemoveDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Command `{program}` could not be started: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with code {}: {stderr}", display_code(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Container engine error: {message}")]
    Engine { message: String },
    #[error("Operation cancelled.")]
    Cancelled,
    #[error("Source `{source_path}` is already mounted to {local}.")]
    AlreadyMounted { source_path: String, local: String },
    #[error("Source `{source_path}` is not mounted.")]
    NotMounted { source_path: String },
    #[error("Mount target {path} does not exist.")]
    MountTargetMissing { path: PathBuf },
    #[error("Hosts file {path} has an unterminated block for project `{project}`.")]
    HostsBlockUnterminated { path: PathBuf, project: String },
    #[error("Scenario `{scenario}` exited with code {code}.")]
    ScenarioFailed { scenario: String, code: i32 },
    #[error("Service `{service}` has no running container.")]
    ServiceNotRunning { service: String },
    #[error("Failed to determine the current working directory: {source}")]
    WorkingDirectoryUnavailable {
        #[source]
        source: io::Error,
    },
    #[error("Unable to determine the home directory; set HOME or DEVBOX_HOME.")]
    HomeDirectoryUnavailable,
    #[error("`destroy` requires an explicit project name (-n).")]
    DestroyRequiresName,
}

impl Error {
    /// Classify an I/O failure on `path`, surfacing permission problems distinctly.
    pub fn io(path: impl Into<PathBuf>, source: io::Error, kind: IoAction) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::PermissionDenied {
            return Error::PermissionDenied { path, source };
        }
        match kind {
            IoAction::Read => Error::ReadFile { path, source },
            IoAction::Write => Error::WriteFile { path, source },
            IoAction::CreateDir => Error::CreateDir { path, source },
            IoAction::Remove => Error::RemoveDir { path, source },
        }
    }
}

/// Filesystem action that failed, used by [`Error::io`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoAction {
    Read,
    Write,
    CreateDir,
    Remove,
}

fn describe_unknown_project(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("Unknown project `{name}`."),
        None => "Unknown project: the current directory does not belong to any installed project. \
                 Please specify the project name with -n."
            .to_string(),
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|code| code.to_string())
        .unwrap_or_else(|| "signal".to_string())
}
