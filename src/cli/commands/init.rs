//! Init command - create a project dockyard.toml

use crate::cli::args::InitArgs;
use crate::config::LOCAL_CONFIG_NAME;
use crate::error::{DockyardError, DockyardResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Template for a project config
const INIT_TEMPLATE: &str = r#"# Dockyard project configuration
# Settings here override your global config (~/.config/dockyard/config.toml).
# Relative paths resolve against this file's directory.

[toolchain]
# components = ["cc", "ld", "curl"]
# update_command = ["apt-get", "update"]
# install_command = ["apt-get", "install", "-y", "--no-install-recommends"]
# clean_paths = ["/var/lib/apt/lists"]

[dependencies]
lockfile = "dockyard.lock"
# index_url = "https://artifacts.example.com"
# url_template = "{index}/{name}/{name}-{version}.tar.gz"
# jobs = 4
# install_command = ["pip", "install", "--no-deps", "--target", "{site}", "{artifact}"]

[source]
dir = "."
# exclude = [".git", "target", "__pycache__"]

[service]
entry = "main:app"
host = "0.0.0.0"
port = 8000
# command = ["python", "-m", "uvicorn", "{entry}", "--host", "{host}", "--port", "{port}"]

[image]
# root = ".dockyard"
expose = 8000

[runtime]
# env_file = ".env"
# env = { LOG_LEVEL = "info" }
"#;

/// Execute the init command
pub async fn execute(args: InitArgs) -> DockyardResult<()> {
    let ctx = UiContext::detect();

    let target_dir = match args.path {
        Some(ref p) => p.clone(),
        None => std::env::current_dir()
            .map_err(|e| DockyardError::io("getting current directory", e))?,
    };

    let config_path = target_dir.join(LOCAL_CONFIG_NAME);

    if config_path.exists() && !args.force {
        return Err(DockyardError::User(format!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        )));
    }

    ensure_dir(&target_dir).await?;

    fs::write(&config_path, INIT_TEMPLATE)
        .await
        .map_err(|e| DockyardError::io(format!("writing {}", config_path.display()), e))?;

    ui::step_ok(&ctx, &format!("Created {}", config_path.display()));
    ui::remark(&ctx, "Next: dockyard lock check, then dockyard run");

    Ok(())
}

async fn ensure_dir(dir: &Path) -> DockyardResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| DockyardError::io(format!("creating directory {}", dir.display()), e))?;
    }
    Ok(())
}
