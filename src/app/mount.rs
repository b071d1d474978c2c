use crate::Result;
use crate::cli::{MountArgs, UmountArgs};
use crate::core::operations;
use crate::core::options::{MountOptions, UmountOptions, Workspace};
use crate::core::outcome::MountOutcome;

use super::common::{Globals, emit_diagnostics};
use super::display::ConsoleReporter;

pub fn handle_mount(workspace: &Workspace, args: MountArgs, globals: &Globals) -> Result<()> {
    let options = MountOptions {
        selector: globals.selector()?,
        source: args.source,
        path: args.path,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::mount(workspace, options, Some(&mut reporter))?;
    emit_diagnostics(&output.diagnostics);
    print_affected(&output.value);
    Ok(())
}

pub fn handle_umount(workspace: &Workspace, args: UmountArgs, globals: &Globals) -> Result<()> {
    let options = UmountOptions {
        selector: globals.selector()?,
        source: args.source,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::umount(workspace, options, Some(&mut reporter))?;
    emit_diagnostics(&output.diagnostics);
    print_affected(&output.value);
    Ok(())
}

fn print_affected(outcome: &MountOutcome) {
    if outcome.affected.is_empty() {
        println!("No service of `{}` uses {}.", outcome.project, outcome.source_path);
    } else if !outcome.restarted {
        println!(
            "{} will use it on the next `devbox up`.",
            outcome.affected.join(", ")
        );
    }
}
