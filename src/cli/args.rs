//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Dockyard - layer-cached build-and-bootstrap pipeline
///
/// Turns a dependency lock file and an application source tree into a
/// running network service, reusing every stage whose inputs are unchanged.
#[derive(Parser, Debug)]
#[command(name = "dockyard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DOCKYARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip project dockyard.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the image: toolchain, dependencies, source
    Build(BuildArgs),

    /// Build the image and start the service
    Run(RunArgs),

    /// Inspect the lock file
    Lock(LockArgs),

    /// Show the state of the last build
    Status(ProjectArgs),

    /// Inspect or discard build layers
    Cache(CacheArgs),

    /// Initialize a project dockyard.toml
    Init(InitArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Project directory selection shared by several commands
#[derive(Parser, Debug, Default, Clone)]
pub struct ProjectArgs {
    /// Project directory (defaults to the directory holding dockyard.toml,
    /// or the current directory)
    #[arg(short, long)]
    pub project: Option<PathBuf>,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Discard all cached layers before building
    #[arg(long)]
    pub fresh: bool,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Discard all cached layers before building
    #[arg(long)]
    pub fresh: bool,

    /// Bind host (overrides service.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port (overrides service.port and image.expose)
    #[arg(long)]
    pub port: Option<u16>,

    /// Entry point locator module:object (overrides service.entry)
    #[arg(long)]
    pub entry: Option<String>,

    /// Additional worker environment variables (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,
}

/// Arguments for the lock command
#[derive(Parser, Debug)]
pub struct LockArgs {
    /// Subcommand for lock
    #[command(subcommand)]
    pub action: LockAction,
}

/// Lock subcommands
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Validate the lock file and list its entries
    Check {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

/// Arguments for the init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite existing dockyard.toml
    #[arg(short, long)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show configuration file paths
    Path,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., service.port)
        key: String,
        /// Value to set
        value: String,
        /// Write to the project dockyard.toml instead of the global config
        #[arg(long)]
        local: bool,
    },
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List recorded build layers
    List {
        #[command(flatten)]
        project: ProjectArgs,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Discard the whole build root
    Clear {
        #[command(flatten)]
        project: ProjectArgs,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}

impl Commands {
    /// Project directory requested by the command, if any
    pub fn project(&self) -> Option<&PathBuf> {
        let args = match self {
            Self::Build(args) => &args.project,
            Self::Run(args) => &args.project,
            Self::Status(project) => project,
            Self::Lock(LockArgs {
                action: LockAction::Check { project, .. },
            }) => project,
            Self::Cache(CacheArgs { action }) => match action {
                CacheAction::List { project, .. } | CacheAction::Clear { project, .. } => project,
            },
            Self::Init(_) | Self::Config(_) | Self::Completions(_) => return None,
        };
        args.project.as_ref()
    }
}

/// Parse environment variable in KEY=VALUE format
fn parse_env_var(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
