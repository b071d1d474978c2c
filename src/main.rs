use std::process::ExitCode;

use clap::{CommandFactory, Parser, error::ErrorKind};

use devbox::app::error::{error_stack, exit_code};
use devbox::app::{
    Globals, handle_destroy, handle_down, handle_env, handle_info, handle_init, handle_list,
    handle_logs, handle_mount, handle_ps, handle_restart, handle_run, handle_shell,
    handle_umount, handle_up, handle_update, handle_update_hosts,
};
use devbox::cli::{Cli, Commands};
use devbox::core::options::Workspace;

const VERSION: &str = env!("DEVBOX_VERSION");

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(64),
            };
        }
    };

    let Cli {
        name,
        profiles,
        command,
    } = cli;
    let globals = Globals { name, profiles };

    let command = match command {
        Some(cmd) => cmd,
        None => {
            let mut command = Cli::command();
            let _ = command.print_help();
            println!();
            return ExitCode::from(64);
        }
    };

    // `version` works without an app directory.
    let exit = match command {
        Commands::Version => Ok(print_version()),
        command => {
            Workspace::from_env().and_then(|workspace| dispatch(&workspace, command, &globals))
        }
    };

    match exit {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {}", error_stack(&err));
            exit_code(&err)
        }
    }
}

fn dispatch(
    workspace: &Workspace,
    command: Commands,
    globals: &Globals,
) -> devbox::Result<ExitCode> {
    let done = |result: devbox::Result<()>| result.map(|()| ExitCode::SUCCESS);
    match command {
        Commands::Init(args) => done(handle_init(workspace, args, globals)),
        Commands::Destroy => done(handle_destroy(workspace, globals)),
        Commands::Up => done(handle_up(workspace, globals)),
        Commands::Down => done(handle_down(workspace, globals)),
        Commands::Restart(args) => done(handle_restart(workspace, args, globals)),
        Commands::Update => done(handle_update(workspace, globals)),
        Commands::Info => done(handle_info(workspace, globals)),
        Commands::List => done(handle_list(workspace)),
        Commands::Ps => done(handle_ps(workspace, globals)),
        Commands::Logs(args) => handle_logs(workspace, args, globals),
        Commands::Shell(args) => handle_shell(workspace, args, globals),
        Commands::Mount(args) => done(handle_mount(workspace, args, globals)),
        Commands::Umount(args) => done(handle_umount(workspace, args, globals)),
        Commands::Run(args) => done(handle_run(workspace, args, globals)),
        Commands::Env => handle_env(workspace, globals),
        Commands::UpdateHosts(args) => done(handle_update_hosts(workspace, args, globals)),
        Commands::Version => Ok(print_version()),
    }
}

fn print_version() -> ExitCode {
    println!("devbox {VERSION}");
    ExitCode::SUCCESS
}
