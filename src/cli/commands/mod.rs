//! CLI command implementations

pub mod build;
pub mod cache;
pub mod completions;
pub mod config;
pub mod init;
pub mod lock;
pub mod run;
pub mod status;

pub use build::execute as build;
pub use cache::execute as cache;
pub use completions::execute as completions;
pub use config::execute as config;
pub use init::execute as init;
pub use lock::execute as lock;
pub use run::execute as run;
pub use status::execute as status;

use crate::audit::AuditLog;
use crate::config::Config;
use crate::fetch::create_fetcher;
use crate::pipeline::Pipeline;
use crate::toolchain::CommandPackages;
use std::path::PathBuf;
use std::sync::Arc;

/// Effective configuration for one invocation and where it came from
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub config: Config,
    /// Directory relative config paths were resolved against
    pub project_dir: PathBuf,
    /// Global config file (may not exist)
    pub global_path: PathBuf,
    /// Project `dockyard.toml`, if one was loaded
    pub local_path: Option<PathBuf>,
}

impl ProjectContext {
    /// Where a project-level setting would be written
    pub fn local_config_path(&self) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| self.project_dir.join(crate::config::LOCAL_CONFIG_NAME))
    }
}

/// Pipeline wired to the configured package manager and artifact index
pub fn pipeline(config: &Config) -> Pipeline {
    Pipeline::new(
        config.clone(),
        Arc::new(CommandPackages::new(&config.toolchain)),
        create_fetcher(&config.dependencies),
        AuditLog::new(config),
    )
}
