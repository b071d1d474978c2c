use std::env;
use std::path::Path;

use crate::Result;
use crate::core::diagnostics::{Diagnostic, Severity};
use crate::core::git::CommitInfo;
use crate::core::options::{ProjectSelector, Workspace};
use crate::core::outcome::HostsStatus;
use crate::core::process::{CommandRunner, CommandSpec};
use crate::error::Error;

/// Arguments shared by every command.
#[derive(Debug, Clone, Default)]
pub struct Globals {
    pub name: Option<String>,
    pub profiles: Vec<String>,
}

impl Globals {
    pub fn selector(&self) -> Result<ProjectSelector> {
        ProjectSelector::current(self.name.clone(), self.profiles.clone())
    }
}

pub fn emit_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        match diagnostic.severity {
            Severity::Warning => {
                eprintln!("Warning: {}", diagnostic.message);
                if let Some(help) = &diagnostic.help {
                    eprintln!("         {help}");
                }
            }
            Severity::Info => {
                println!("{}", diagnostic.message);
                if let Some(help) = &diagnostic.help {
                    println!("{help}");
                }
            }
            Severity::Error => {
                eprintln!("Error: {}", diagnostic.message);
                if let Some(help) = &diagnostic.help {
                    eprintln!("       {help}");
                }
            }
        }
    }
}

pub fn describe_commit(commit: Option<&CommitInfo>) -> String {
    match commit {
        Some(commit) => format!(
            "{} {} ({}, {})",
            commit.short_hash(),
            commit.message,
            commit.author,
            commit.date
        ),
        None => "unknown commit".to_string(),
    }
}

/// Finish a hosts update the current process could not write, by rerunning the hidden
/// `update-hosts` command through `sudo`.
pub fn finish_hosts(
    workspace: &Workspace,
    status: HostsStatus,
    project: &str,
    cleanup: bool,
) -> Result<()> {
    if status != HostsStatus::NeedsElevation {
        return Ok(());
    }
    // SAFETY: geteuid has no preconditions and cannot fail.
    let is_root = unsafe { libc::geteuid() } == 0;
    let exe = env::current_exe().map_err(|source| Error::CommandSpawn {
        program: "devbox".to_string(),
        source,
    })?;
    elevate_hosts(
        workspace.backend.commands.as_ref(),
        &exe,
        project,
        cleanup,
        is_root,
    )
}

fn elevate_hosts(
    commands: &dyn CommandRunner,
    exe: &Path,
    project: &str,
    cleanup: bool,
    is_root: bool,
) -> Result<()> {
    if is_root {
        eprintln!("Warning: the hosts file is not writable; skipping the update for `{project}`.");
        return Ok(());
    }
    eprintln!("Updating the hosts file needs elevated privileges; running sudo.");
    let mut spec = CommandSpec::new("sudo")
        .arg(exe.to_string_lossy())
        .args(["update-hosts", "-n", project]);
    if cleanup {
        spec = spec.arg("--cleanup");
    }
    let code = commands.run_attached(&spec)?;
    if code != 0 {
        return Err(Error::CommandFailed {
            command: spec.display(),
            code: Some(code),
            stderr: String::new(),
        });
    }
    Ok(())
}
