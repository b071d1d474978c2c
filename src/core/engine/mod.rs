//! Capability interface to the container engine.
//!
//! Runners only talk to [`ContainerEngine`]; the shipped implementation drives the engine's
//! command-line client (see [`docker`]).

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;

use super::cancel::CancelToken;

pub mod docker;
#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerCli;

/// Labels every resource must carry to match; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilter {
    pub labels: Vec<(String, String)>,
}

impl LabelFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSpec {
    Bind {
        source: String,
        target: String,
    },
    Volume {
        /// `None` for an anonymous volume removed with the container.
        source: Option<String>,
        target: String,
        subpath: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub host_ip: Option<String>,
    pub published: Option<u16>,
    pub target: u16,
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthcheckSpec {
    pub test: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub entrypoint: Option<Vec<String>>,
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub ports: Vec<PortSpec>,
    pub healthcheck: Option<HealthcheckSpec>,
    pub hostname: Option<String>,
    pub network: Option<String>,
    pub network_aliases: Vec<String>,
    pub working_dir: Option<String>,
    pub user: Option<String>,
    pub stop_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub tag: String,
    /// Dockerfile path inside the context archive.
    pub dockerfile: String,
    pub labels: BTreeMap<String, String>,
}

/// Subset of a container's inspected state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    /// `created`, `running`, `exited`, ...
    pub status: String,
    pub running: bool,
    pub exit_code: i64,
    /// `starting`, `healthy` or `unhealthy` when a healthcheck is configured.
    pub health: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub labels: BTreeMap<String, String>,
}

/// Interactive command inside a running container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: Vec<String>,
    pub tty: bool,
    pub interactive: bool,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub follow: bool,
    pub tail: Option<usize>,
}

pub trait ContainerEngine: Send + Sync {
    /// Whether `image` is present locally.
    fn image_exists(&self, image: &str, cancel: &CancelToken) -> Result<bool>;
    fn pull_image(&self, image: &str, cancel: &CancelToken) -> Result<()>;
    /// Build from a tar archive of the context; returns once the build has fully finished.
    fn build_image(
        &self,
        context: Vec<u8>,
        options: &BuildOptions,
        cancel: &CancelToken,
    ) -> Result<()>;

    /// Create a container and return its id.
    fn create_container(&self, spec: &ContainerSpec, cancel: &CancelToken) -> Result<String>;
    fn start_container(&self, id: &str, cancel: &CancelToken) -> Result<()>;
    fn stop_container(&self, id: &str, timeout: Duration, cancel: &CancelToken) -> Result<()>;
    fn remove_container(&self, id: &str, cancel: &CancelToken) -> Result<()>;
    fn inspect_container(&self, id: &str, cancel: &CancelToken) -> Result<ContainerState>;
    /// Containers in any state carrying every label of `filter`.
    fn list_containers(
        &self,
        filter: &LabelFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ContainerSummary>>;

    fn create_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<()>;
    fn list_volumes(&self, filter: &LabelFilter, cancel: &CancelToken) -> Result<Vec<String>>;
    fn remove_volume(&self, name: &str, cancel: &CancelToken) -> Result<()>;

    fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancelToken,
    ) -> Result<()>;
    fn list_networks(&self, filter: &LabelFilter, cancel: &CancelToken) -> Result<Vec<String>>;
    fn remove_network(&self, name: &str, cancel: &CancelToken) -> Result<()>;

    /// Run a command in a running container attached to the terminal; returns its exit code.
    fn exec(&self, container: &str, spec: &ExecSpec) -> Result<i32>;
    /// Stream a container's logs to the terminal.
    fn logs(&self, container: &str, options: LogOptions) -> Result<i32>;
}
