//! Core devbox library API surface.

pub mod diagnostics;
pub mod events;
pub mod options;
pub mod outcome;
pub mod reporter;

pub mod autodetect;
pub mod cancel;
pub mod depgraph;
pub mod engine;
pub mod git;
pub mod hosts;
pub mod manifest;
pub mod mount;
pub mod operations;
pub mod planner;
pub mod process;
pub mod project;
pub mod runners;
pub mod state;
pub mod url;

pub use diagnostics::{Diagnostic, Severity};
pub use events::Event;
pub use operations::{
    destroy, down, env, info, init, list, logs, mount, ps, restart, run, shell, umount, up,
    update, update_hosts,
};
pub use options::{
    Backend, DestroyOptions, HostsOptions, InfoOptions, InitOptions, LifecycleOptions,
    LogsOptions, MountOptions, ProjectSelector, RestartOptions, RunOptions, ShellOptions,
    UmountOptions, Workspace,
};
pub use outcome::{
    AttachedOutcome, ContainerRow, DestroyOutcome, DownOutcome, HostsOutcome, HostsStatus,
    InfoOutcome, InitOutcome, ListOutcome, MountOutcome, OperationOutput, OperationResult,
    ProjectSummary, PsOutcome, RestartOutcome, ScenarioInfo, SourceInfo, UpOutcome,
};
pub use reporter::Reporter;
