//! Dockyard - layer-cached build-and-bootstrap pipeline
//!
//! CLI entry point that loads configuration and dispatches to subcommands.

use clap::Parser;
use console::style;
use dockyard::cli::commands::{self, ProjectContext};
use dockyard::cli::{Cli, Commands};
use dockyard::config::ConfigManager;
use dockyard::error::{DockyardError, DockyardResult};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> DockyardResult<()> {
    let cli = Cli::parse();
    dockyard::ui::init_theme();

    // Commands that don't need configuration
    match cli.command {
        Commands::Init(args) => {
            init_logging(cli.verbose, false);
            return commands::init(args).await;
        }
        Commands::Completions(args) => return commands::completions(args).await,
        _ => {}
    }

    let project = load_project(&cli).await?;
    init_logging(cli.verbose, project.config.general.log_format == "json");
    debug!("Project directory: {}", project.project_dir.display());

    ConfigManager::ensure_state_dirs().await?;

    match cli.command {
        Commands::Init(_) | Commands::Completions(_) => unreachable!("handled above"),
        Commands::Build(args) => commands::build(args, &project).await,
        Commands::Run(args) => commands::run(args, &project).await,
        Commands::Lock(args) => commands::lock(args, &project).await,
        Commands::Status(args) => commands::status(args, &project).await,
        Commands::Cache(args) => commands::cache(args, &project).await,
        Commands::Config(args) => commands::config(args, &project).await,
    }
}

/// Logging: 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set
fn init_logging(verbose: u8, json: bool) {
    let default = match verbose {
        0 => "dockyard=warn",
        1 => "dockyard=info",
        _ => "dockyard=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

/// Load global and project configuration, then apply command-line overrides
async fn load_project(cli: &Cli) -> DockyardResult<ProjectContext> {
    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let cwd = std::env::current_dir()
        .map_err(|e| DockyardError::io("getting current directory", e))?;
    let requested = cli.command.project().map(|p| absolute(&cwd, p));
    let start = requested.clone().unwrap_or_else(|| cwd.clone());

    let local_path = if cli.no_local {
        debug!("Local config discovery disabled (--no-local)");
        None
    } else {
        let found = ConfigManager::find_local_config(&start);
        if let Some(ref path) = found {
            debug!("Found local config: {}", path.display());
        }
        found
    };

    let project_dir = match (requested, &local_path) {
        (Some(dir), _) => dir,
        (None, Some(local)) => local.parent().map(Path::to_path_buf).unwrap_or(cwd),
        (None, None) => cwd,
    };

    let mut config = manager.load_merged(local_path.as_deref()).await?;
    config.resolve_paths(&project_dir);

    if let Commands::Run(ref args) = cli.command {
        if let Some(ref host) = args.host {
            config.service.host = host.clone();
        }
        if let Some(port) = args.port {
            config.service.port = port;
            config.image.expose = port;
        }
        if let Some(ref entry) = args.entry {
            config.service.entry = entry.clone();
        }
        for (key, value) in &args.env {
            config.runtime.env.insert(key.clone(), value.clone());
        }
    }

    // `config` must stay usable to repair an invalid file
    if !matches!(cli.command, Commands::Config(_)) {
        let origin = local_path.clone().unwrap_or_else(|| manager.path().to_path_buf());
        config.validate(&origin)?;
    }

    Ok(ProjectContext {
        config,
        project_dir,
        global_path: manager.path().to_path_buf(),
        local_path,
    })
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
