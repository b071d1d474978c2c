use std::process::ExitCode;

use crate::Result;
use crate::cli::{LogsArgs, RunArgs, ShellArgs};
use crate::core::operations;
use crate::core::options::{InfoOptions, LogsOptions, RunOptions, ShellOptions, Workspace};
use crate::core::outcome::{AttachedOutcome, ContainerRow, OperationOutput};

use super::common::{Globals, emit_diagnostics};
use super::display::ConsoleReporter;

pub fn handle_ps(workspace: &Workspace, globals: &Globals) -> Result<()> {
    let options = InfoOptions {
        selector: globals.selector()?,
    };
    let output = operations::ps(workspace, options, None)?;
    emit_diagnostics(&output.diagnostics);
    if output.value.rows.is_empty() {
        println!("No containers for project `{}`.", output.value.project);
        return Ok(());
    }
    print!("{}", render_rows(&output.value.rows));
    Ok(())
}

pub fn handle_logs(workspace: &Workspace, args: LogsArgs, globals: &Globals) -> Result<ExitCode> {
    let options = LogsOptions {
        selector: globals.selector()?,
        services: args.services,
        follow: args.follow,
        tail: args.tail,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::logs(workspace, options, Some(&mut reporter))?;
    Ok(attached_exit(output))
}

pub fn handle_shell(workspace: &Workspace, args: ShellArgs, globals: &Globals) -> Result<ExitCode> {
    let options = ShellOptions {
        selector: globals.selector()?,
        service: args.service,
        bash: args.bash,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::shell(workspace, options, Some(&mut reporter))?;
    Ok(attached_exit(output))
}

pub fn handle_run(workspace: &Workspace, args: RunArgs, globals: &Globals) -> Result<()> {
    let options = RunOptions {
        selector: globals.selector()?,
        scenario: args.scenario,
        args: args.args,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::run(workspace, options, Some(&mut reporter))?;
    emit_diagnostics(&output.diagnostics);
    Ok(())
}

pub fn handle_env(workspace: &Workspace, globals: &Globals) -> Result<ExitCode> {
    let options = InfoOptions {
        selector: globals.selector()?,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::env(workspace, options, Some(&mut reporter))?;
    Ok(attached_exit(output))
}

/// Exit with the attached process' status.
fn attached_exit(output: OperationOutput<AttachedOutcome>) -> ExitCode {
    emit_diagnostics(&output.diagnostics);
    match output.value.exit_code {
        0 => ExitCode::SUCCESS,
        code => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    }
}

fn render_rows(rows: &[ContainerRow]) -> String {
    let headers = ["NAME", "SERVICE", "KIND", "STATE", "STATUS"];
    let cells: Vec<[&str; 5]> = rows
        .iter()
        .map(|row| {
            [
                row.name.as_str(),
                row.service.as_str(),
                row.kind.as_str(),
                row.state.as_str(),
                row.status.as_str(),
            ]
        })
        .collect();
    let mut widths = headers.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    for row in std::iter::once(headers).chain(cells) {
        let line = row
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
