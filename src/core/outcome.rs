use std::path::PathBuf;

use super::diagnostics::Diagnostic;
use super::events::Event;
use super::git::CommitInfo;

/// Result wrapper returned by high-level operations.
pub type OperationResult<T> = crate::error::Result<OperationOutput<T>>;

/// Envelope for successful operation outcomes.
#[derive(Debug)]
pub struct OperationOutput<T> {
    /// Primary value produced by the operation.
    pub value: T,
    /// Diagnostics collected while performing the operation.
    pub diagnostics: Vec<Diagnostic>,
    /// Structured events captured during the run.
    pub events: Vec<Event>,
}

impl<T> OperationOutput<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            diagnostics: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Diagnostic>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_events(mut self, events: Vec<Event>) -> Self {
        self.events = events;
        self
    }
}

/// What happened to the project's hosts-file block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostsStatus {
    /// Nothing to write, or the block already matched.
    Unchanged,
    Updated,
    /// The hosts file is not writable by this process; rerun `update-hosts` elevated.
    NeedsElevation,
}

#[derive(Debug)]
pub struct InitOutcome {
    pub project: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct UpOutcome {
    pub project: String,
    /// Services and actions brought up.
    pub started: Vec<String>,
    pub hosts: HostsStatus,
}

#[derive(Debug)]
pub struct DownOutcome {
    pub project: String,
    /// Containers removed, including leftovers of services no longer planned.
    pub removed: Vec<String>,
    /// Teardown steps that failed and were skipped.
    pub failures: usize,
    pub hosts: HostsStatus,
}

#[derive(Debug)]
pub struct RestartOutcome {
    pub project: String,
    pub services: Vec<String>,
    pub hosts: HostsStatus,
}

#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub name: String,
    pub url: String,
    pub branch: Option<String>,
    pub path: PathBuf,
    /// Mounted source paths of this source and their local checkouts.
    pub mounts: Vec<(String, String)>,
    pub commit: Option<CommitInfo>,
}

#[derive(Debug, Clone)]
pub struct ScenarioInfo {
    pub name: String,
    pub service: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InfoOutcome {
    pub project: String,
    pub path: PathBuf,
    pub manifest_commit: Option<CommitInfo>,
    pub sources: Vec<SourceInfo>,
    pub scenarios: Vec<ScenarioInfo>,
    pub host_entries: Vec<String>,
    pub cert_domains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProjectSummary {
    pub name: String,
    pub path: PathBuf,
    pub commit: Option<CommitInfo>,
}

#[derive(Debug)]
pub struct ListOutcome {
    pub projects: Vec<ProjectSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRow {
    pub name: String,
    /// Service, action or resource name from the container labels.
    pub service: String,
    pub kind: String,
    pub state: String,
    pub status: String,
}

#[derive(Debug)]
pub struct PsOutcome {
    pub project: String,
    pub rows: Vec<ContainerRow>,
}

/// Outcome of operations attached to the terminal (`logs`, `shell`, `run`, `env`).
#[derive(Debug)]
pub struct AttachedOutcome {
    pub project: String,
    pub exit_code: i32,
}

#[derive(Debug)]
pub struct MountOutcome {
    pub project: String,
    pub source_path: String,
    pub local_path: PathBuf,
    /// Services whose containers use the source.
    pub affected: Vec<String>,
    /// Whether the affected services were restarted (only when the project runs).
    pub restarted: bool,
}

#[derive(Debug)]
pub struct DestroyOutcome {
    pub project: String,
    pub path: PathBuf,
    pub hosts: HostsStatus,
}

#[derive(Debug)]
pub struct HostsOutcome {
    pub path: PathBuf,
    pub changed: bool,
}
