use crate::Result;
use crate::cli::InitArgs;
use crate::core::operations;
use crate::core::options::{InfoOptions, InitOptions, LifecycleOptions, Workspace};
use crate::core::outcome::{InfoOutcome, ListOutcome};

use super::common::{Globals, describe_commit, emit_diagnostics};
use super::display::ConsoleReporter;

pub fn handle_init(workspace: &Workspace, args: InitArgs, globals: &Globals) -> Result<()> {
    let options = InitOptions {
        url: args.url,
        name: globals.name.clone(),
        branch: args.branch,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::init(workspace, options, Some(&mut reporter))?;
    emit_diagnostics(&output.diagnostics);

    let outcome = output.value;
    println!("✔ Initialized project `{}`.", outcome.project);
    println!("  path → {}", outcome.path.display());
    println!();
    println!("Next steps:");
    println!("  • Run `devbox up -n {}` to start it.", outcome.project);
    println!("  • Run `devbox env -n {}` to edit its .env file.", outcome.project);
    Ok(())
}

pub fn handle_update(workspace: &Workspace, globals: &Globals) -> Result<()> {
    let options = LifecycleOptions {
        selector: globals.selector()?,
    };
    let mut reporter = ConsoleReporter::new();
    let output = operations::update(workspace, options, Some(&mut reporter))?;
    emit_diagnostics(&output.diagnostics);
    println!();
    print!("{}", render_info(&output.value));
    Ok(())
}

pub fn handle_info(workspace: &Workspace, globals: &Globals) -> Result<()> {
    let options = InfoOptions {
        selector: globals.selector()?,
    };
    let output = operations::info(workspace, options, None)?;
    emit_diagnostics(&output.diagnostics);
    print!("{}", render_info(&output.value));
    Ok(())
}

pub fn handle_list(workspace: &Workspace) -> Result<()> {
    let output = operations::list(workspace, None)?;
    emit_diagnostics(&output.diagnostics);
    print!("{}", render_list(&output.value));
    Ok(())
}

fn render_info(info: &InfoOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!("Project: {}\n", info.project));
    out.push_str(&format!("Path:    {}\n", info.path.display()));
    out.push_str(&format!(
        "Commit:  {}\n",
        describe_commit(info.manifest_commit.as_ref())
    ));

    if !info.sources.is_empty() {
        out.push_str("\nSources:\n");
    }
    for source in &info.sources {
        let branch = source
            .branch
            .as_deref()
            .map(|branch| format!(" ({branch})"))
            .unwrap_or_default();
        out.push_str(&format!("  {}: {}{branch}\n", source.name, source.url));
        out.push_str(&format!(
            "    commit: {}\n",
            describe_commit(source.commit.as_ref())
        ));
        for (source_path, local) in &source.mounts {
            out.push_str(&format!("    mounted: {source_path} → {local}\n"));
        }
    }

    if !info.scenarios.is_empty() {
        out.push_str("\nScenarios:\n");
    }
    for scenario in &info.scenarios {
        match &scenario.description {
            Some(description) => out.push_str(&format!(
                "  {} [{}]: {description}\n",
                scenario.name, scenario.service
            )),
            None => out.push_str(&format!("  {} [{}]\n", scenario.name, scenario.service)),
        }
    }

    if !info.host_entries.is_empty() {
        out.push_str("\nHosts:\n");
        for entry in &info.host_entries {
            out.push_str(&format!("  {entry}\n"));
        }
    }
    if !info.cert_domains.is_empty() {
        out.push_str(&format!(
            "\nCertificate domains: {}\n",
            info.cert_domains.join(", ")
        ));
    }
    out
}

fn render_list(list: &ListOutcome) -> String {
    if list.projects.is_empty() {
        return "No projects installed. Use `devbox init <url>` to add one.\n".to_string();
    }
    let width = list
        .projects
        .iter()
        .map(|project| project.name.len())
        .max()
        .unwrap_or(0);
    list.projects
        .iter()
        .map(|project| {
            format!(
                "{:<width$}  {}\n",
                project.name,
                describe_commit(project.commit.as_ref())
            )
        })
        .collect()
}
