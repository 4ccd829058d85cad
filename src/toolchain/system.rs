//! System package manager backends

use crate::command;
use crate::config::schema::ToolchainConfig;
use crate::error::{DockyardError, DockyardResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Abstract system package manager
///
/// Lets provisioning run against the host's package manager in production
/// and against fakes in tests.
#[async_trait]
pub trait SystemPackages: Send + Sync {
    /// Whether this backend can install anything at all
    fn can_install(&self) -> bool;

    /// Refresh the package index
    async fn refresh(&self) -> DockyardResult<()>;

    /// Install the named packages
    async fn install(&self, packages: &[String]) -> DockyardResult<()>;

    /// Remove transient package-index caches
    async fn clean(&self) -> DockyardResult<()>;
}

/// Package manager driven by configured commands
#[derive(Debug, Clone, Default)]
pub struct CommandPackages {
    update_command: Vec<String>,
    install_command: Vec<String>,
    clean_paths: Vec<PathBuf>,
}

impl CommandPackages {
    pub fn new(config: &ToolchainConfig) -> Self {
        Self {
            update_command: config.update_command.clone(),
            install_command: config.install_command.clone(),
            clean_paths: config.clean_paths.clone(),
        }
    }
}

#[async_trait]
impl SystemPackages for CommandPackages {
    fn can_install(&self) -> bool {
        !self.install_command.is_empty()
    }

    async fn refresh(&self) -> DockyardResult<()> {
        if self.update_command.is_empty() {
            return Ok(());
        }
        command::exec(&self.update_command, &BTreeMap::new()).await?;
        Ok(())
    }

    async fn install(&self, packages: &[String]) -> DockyardResult<()> {
        if !self.can_install() {
            return Err(DockyardError::Internal(
                "no toolchain.install_command configured".to_string(),
            ));
        }
        let mut argv = self.install_command.clone();
        argv.extend(packages.iter().cloned());
        command::exec(&argv, &BTreeMap::new()).await?;
        Ok(())
    }

    async fn clean(&self) -> DockyardResult<()> {
        for path in &self.clean_paths {
            let metadata = match tokio::fs::symlink_metadata(path).await {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(DockyardError::io(format!("inspecting {}", path.display()), e))
                }
            };
            debug!("Removing package cache {}", path.display());
            let removed = if metadata.is_dir() {
                tokio::fs::remove_dir_all(path).await
            } else {
                tokio::fs::remove_file(path).await
            };
            removed.map_err(|e| DockyardError::io(format!("removing {}", path.display()), e))?;
        }
        Ok(())
    }
}
