use crate::Result;
use crate::cli::{RestartArgs, UpdateHostsArgs};
use crate::core::operations;
use crate::core::options::{
    DestroyOptions, HostsOptions, LifecycleOptions, RestartOptions, Workspace,
};

use super::common::{Globals, emit_diagnostics, finish_hosts};
use super::display::ConsoleReporter;

pub fn handle_up(workspace: &Workspace, globals: &Globals) -> Result<()> {
    let options = LifecycleOptions {
        selector: globals.selector()?,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::up(workspace, options, Some(&mut reporter))?;
    emit_diagnostics(&output.diagnostics);

    let outcome = output.value;
    finish_hosts(workspace, outcome.hosts, &outcome.project, false)?;
    println!(
        "✔ Project `{}` is up ({}).",
        outcome.project,
        outcome.started.join(", ")
    );
    Ok(())
}

pub fn handle_down(workspace: &Workspace, globals: &Globals) -> Result<()> {
    let options = LifecycleOptions {
        selector: globals.selector()?,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::down(workspace, options, Some(&mut reporter))?;
    emit_diagnostics(&output.diagnostics);

    let outcome = output.value;
    finish_hosts(workspace, outcome.hosts, &outcome.project, true)?;
    if outcome.failures > 0 {
        eprintln!(
            "Warning: {} teardown step(s) of `{}` failed; see above.",
            outcome.failures, outcome.project
        );
    }
    println!(
        "✔ Project `{}` is down ({} container(s) removed).",
        outcome.project,
        outcome.removed.len()
    );
    Ok(())
}

pub fn handle_restart(workspace: &Workspace, args: RestartArgs, globals: &Globals) -> Result<()> {
    let options = RestartOptions {
        selector: globals.selector()?,
        services: args.services,
        no_deps: args.no_deps,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::restart(workspace, options, Some(&mut reporter))?;
    emit_diagnostics(&output.diagnostics);

    let outcome = output.value;
    finish_hosts(workspace, outcome.hosts, &outcome.project, false)?;
    println!("✔ Restarted {}.", outcome.services.join(", "));
    Ok(())
}

pub fn handle_destroy(workspace: &Workspace, globals: &Globals) -> Result<()> {
    let options = DestroyOptions {
        name: globals.name.clone().unwrap_or_default(),
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::destroy(workspace, options, Some(&mut reporter))?;
    emit_diagnostics(&output.diagnostics);

    let outcome = output.value;
    finish_hosts(workspace, outcome.hosts, &outcome.project, true)?;
    println!(
        "✔ Destroyed project `{}` ({} removed).",
        outcome.project,
        outcome.path.display()
    );
    Ok(())
}

/// Runs elevated on behalf of another devbox process; prints only failures.
pub fn handle_update_hosts(
    workspace: &Workspace,
    args: UpdateHostsArgs,
    globals: &Globals,
) -> Result<()> {
    let options = HostsOptions {
        name: globals.name.clone().unwrap_or_default(),
        cleanup: args.cleanup,
    };
    let output = operations::update_hosts(workspace, options, None)?;
    emit_diagnostics(&output.diagnostics);
    Ok(())
}
