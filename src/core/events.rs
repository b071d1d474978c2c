use std::path::PathBuf;

use super::diagnostics::Severity;
use super::git::CommitInfo;
use super::runners::RunnerKind;

/// Structured event emitted during long-running operations.
#[derive(Debug, Clone)]
pub enum Event {
    /// A textual progress update with a severity level.
    Message { severity: Severity, text: String },
    /// A dependency graph node began executing.
    NodeStarted { kind: RunnerKind, reference: String },
    /// A dependency graph node completed successfully.
    NodeFinished {
        kind: RunnerKind,
        reference: String,
        elapsed_ms: u64,
    },
    /// A dependency graph node failed; the round will be cancelled.
    NodeFailed {
        kind: RunnerKind,
        reference: String,
        error: String,
    },
    /// A teardown step failed but the remaining stops continue.
    StopFailed {
        kind: RunnerKind,
        reference: String,
        error: String,
    },
    /// An image was pulled because it was not present locally.
    ImagePulled { image: String },
    /// An internal image was built from its container definition.
    ImageBuilt { image: String },
    /// A source checkout was synchronised.
    SourceSynced {
        name: String,
        path: PathBuf,
        commit: Option<CommitInfo>,
    },
    /// A container was created and started.
    ContainerStarted { name: String },
    /// A container passed its readiness check.
    ContainerReady { name: String },
    /// A container was stopped and removed.
    ContainerRemoved { name: String },
    /// Every command of an action exited successfully.
    ActionCompleted { name: String, commands: usize },
    /// The project block of the hosts file was rewritten (or found up to date).
    HostsUpdated { path: PathBuf, changed: bool },
    /// Services about to be restarted.
    Restarting { services: Vec<String> },
}

impl Event {
    pub fn info(text: impl Into<String>) -> Self {
        Event::Message {
            severity: Severity::Info,
            text: text.into(),
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Event::Message {
            severity: Severity::Warning,
            text: text.into(),
        }
    }
}
