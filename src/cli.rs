use clap::{ArgAction, Args, Parser, Subcommand};

const VERSION: &str = env!("DEVBOX_VERSION");

/// Top-level CLI definition for the `devbox` tool.
#[derive(Debug, Parser)]
#[command(
    name = "devbox",
    version = VERSION,
    about = "Run multi-repository development environments as local containers.",
    long_about = "Devbox clones a project manifest, checks out its sources and runs the declared \
                  services, actions and scenarios on the local container engine.\n\
                  Mount a working copy over a source to develop against the running project."
)]
pub struct Cli {
    /// Project to operate on. Detected from the current directory when omitted.
    #[arg(
        global = true,
        short = 'n',
        long = "name",
        value_name = "NAME",
        help = "Select the project by NAME instead of detecting it from the current directory"
    )]
    pub name: Option<String>,

    /// Compose profiles enabling optional services.
    #[arg(
        global = true,
        long = "profile",
        value_name = "PROFILE",
        help = "Enable services of PROFILE (repeatable)"
    )]
    pub profiles: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Clone a project manifest and prepare its directory.
    Init(InitArgs),
    /// Tear a project down, remove its volumes and delete its directory. Requires -n.
    Destroy,
    /// Build, pull and start every service of the project.
    #[command(visible_alias = "start")]
    Up,
    /// Stop and remove the project's containers and network.
    #[command(visible_alias = "stop")]
    Down,
    /// Recreate selected services (all by default) with their dependencies.
    Restart(RestartArgs),
    /// Pull the manifest, resync every source and show project info.
    Update,
    /// Show the manifest commit, sources, mounts and scenarios of a project.
    Info,
    /// List installed projects.
    List,
    /// List the project's containers.
    Ps,
    /// Show container logs of the project's services.
    Logs(LogsArgs),
    /// Open a shell in a running service container.
    Shell(ShellArgs),
    /// Use a local working copy in place of a source checkout.
    Mount(MountArgs),
    /// Return a mounted source to its checkout.
    #[command(visible_alias = "unmount")]
    Umount(UmountArgs),
    /// Run a scenario declared by the project.
    Run(RunArgs),
    /// Edit the project's .env file.
    Env,
    /// Print the devbox version.
    Version,
    #[command(hide = true)]
    UpdateHosts(UpdateHostsArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Manifest repository URL.
    #[arg(value_name = "URL")]
    pub url: String,

    /// Branch of the manifest repository to check out.
    #[arg(
        short = 'b',
        long = "branch",
        value_name = "BRANCH",
        help = "Clone BRANCH instead of the repository's default branch"
    )]
    pub branch: Option<String>,
}

#[derive(Debug, Args, Default)]
pub struct RestartArgs {
    /// Services to restart.
    #[arg(
        short = 's',
        long = "service",
        value_name = "SERVICE",
        num_args = 1..,
        action = ArgAction::Append,
        help = "Restart only SERVICE (repeatable); every service by default"
    )]
    pub services: Vec<String>,

    /// Only recreate the services, not their images, volumes or network.
    #[arg(long, help = "Skip rebuilding images and recreating volumes and the network")]
    pub no_deps: bool,
}

#[derive(Debug, Args, Default)]
pub struct LogsArgs {
    /// Services to show; all when omitted.
    #[arg(value_name = "SERVICE")]
    pub services: Vec<String>,

    /// Follow logs in real time.
    #[arg(short, long, help = "Stream logs until interrupted")]
    pub follow: bool,

    /// Number of historical lines to display.
    #[arg(
        long,
        value_name = "LINES",
        help = "Show only the most recent LINES of each container"
    )]
    pub tail: Option<usize>,
}

#[derive(Debug, Args, Default)]
pub struct ShellArgs {
    /// Service to enter; detected from the current source checkout when omitted.
    #[arg(value_name = "SERVICE")]
    pub service: Option<String>,

    #[arg(long, help = "Start bash instead of /bin/sh")]
    pub bash: bool,
}

#[derive(Debug, Args, Default)]
pub struct MountArgs {
    #[arg(
        short = 's',
        long = "source",
        value_name = "SOURCE",
        help = "Source to replace (`./sources/<name>[/path]` or a source name); detected when omitted"
    )]
    pub source: Option<String>,

    #[arg(
        short = 'p',
        long = "path",
        value_name = "PATH",
        help = "Local working copy to mount; the current repository by default"
    )]
    pub path: Option<String>,
}

#[derive(Debug, Args, Default)]
pub struct UmountArgs {
    #[arg(
        short = 's',
        long = "source",
        value_name = "SOURCE",
        help = "Mounted source to release; detected when omitted"
    )]
    pub source: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Scenario name.
    #[arg(value_name = "SCENARIO")]
    pub scenario: String,

    /// Extra arguments appended to the scenario command.
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub args: Vec<String>,
}

#[derive(Debug, Args, Default)]
pub struct UpdateHostsArgs {
    /// Remove the project's hosts block instead of writing it.
    #[arg(long)]
    pub cleanup: bool,
}
