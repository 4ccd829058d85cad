//! Native toolchain provisioning
//!
//! Guarantees that every configured toolchain component (compiler, linker,
//! fetch tool) is present and executable before dependencies install.
//! Missing components go through the system package manager; transient
//! package-index caches are removed afterwards.

mod system;

pub use system::{CommandPackages, SystemPackages};

use crate::config::schema::ToolchainConfig;
use crate::error::{DockyardError, DockyardResult};
use crate::layer::{Fingerprinter, LayerStore};
use crate::pipeline::{Stage, StageOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File recording resolved component paths inside the toolchain layer
const TOOLCHAIN_MANIFEST: &str = "toolchain.json";

/// What provisioning found and did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolchainReport {
    /// Component name -> resolved executable
    pub components: BTreeMap<String, PathBuf>,
    /// System packages installed during this build
    pub installed: Vec<String>,
}

/// Ensures toolchain components exist
pub struct Provisioner<'a> {
    config: &'a ToolchainConfig,
    packages: Arc<dyn SystemPackages>,
    search_path: Vec<PathBuf>,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner that searches the process `PATH`
    pub fn new(config: &'a ToolchainConfig, packages: Arc<dyn SystemPackages>) -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self {
            config,
            packages,
            search_path,
        }
    }

    /// Search these directories instead of `PATH`
    pub fn with_search_path(mut self, search_path: Vec<PathBuf>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Make every component available and record the toolchain layer
    pub async fn provision(
        &self,
        store: &mut LayerStore,
    ) -> DockyardResult<(ToolchainReport, StageOutcome)> {
        let report = self.ensure_components().await?;

        let mut names: Vec<&str> = self.config.components.iter().map(String::as_str).collect();
        names.sort_unstable();
        names.dedup();
        let mut fp = Fingerprinter::new("toolchain");
        for name in names {
            fp.input("component", name.as_bytes());
        }
        let fingerprint = fp.finish();

        if let Some(layer) = store.lookup(Stage::Toolchain, &fingerprint) {
            debug!("Toolchain layer unchanged ({})", layer.short_fingerprint());
            return Ok((
                report,
                StageOutcome {
                    stage: Stage::Toolchain,
                    layer: layer.clone(),
                    cached: true,
                },
            ));
        }

        let work = store.begin(Stage::Toolchain, &fingerprint).await?;
        let manifest = work.staging.join(TOOLCHAIN_MANIFEST);
        let content = serde_json::to_string_pretty(&report)?;
        if let Err(e) = tokio::fs::write(&manifest, content).await {
            store.abort(work).await;
            return Err(DockyardError::io(
                format!("writing {}", manifest.display()),
                e,
            ));
        }
        let layer = store.commit(work).await?;

        Ok((
            report,
            StageOutcome {
                stage: Stage::Toolchain,
                layer,
                cached: false,
            },
        ))
    }

    async fn ensure_components(&self) -> DockyardResult<ToolchainReport> {
        let mut report = ToolchainReport::default();
        let missing = self.resolve_into(&mut report);

        if missing.is_empty() {
            return Ok(report);
        }

        debug!("Missing toolchain components: {:?}", missing);
        if !self.packages.can_install() {
            return Err(DockyardError::ToolchainUnavailable {
                component: missing[0].clone(),
            });
        }

        let mut packages: Vec<String> = missing
            .iter()
            .map(|c| self.config.packages.get(c).cloned().unwrap_or_else(|| c.clone()))
            .collect();
        packages.sort();
        packages.dedup();

        info!("Installing system packages: {}", packages.join(" "));
        let installed = async {
            self.packages.refresh().await?;
            self.packages.install(&packages).await
        }
        .await;

        // Index caches go regardless of whether the install succeeded
        if let Err(e) = self.packages.clean().await {
            warn!("Failed to clean package caches: {}", e);
        }

        if let Err(e) = installed {
            warn!("System package installation failed: {}", e);
            return Err(DockyardError::ToolchainUnavailable {
                component: missing[0].clone(),
            });
        }
        report.installed = packages;

        let still_missing = self.resolve_into(&mut report);
        if let Some(component) = still_missing.into_iter().next() {
            return Err(DockyardError::ToolchainUnavailable { component });
        }

        Ok(report)
    }

    /// Resolve all components into the report, returning the missing ones
    fn resolve_into(&self, report: &mut ToolchainReport) -> Vec<String> {
        let mut missing = Vec::new();
        for component in &self.config.components {
            match find_executable(component, &self.search_path) {
                Some(path) => {
                    debug!("Found {} at {}", component, path.display());
                    report.components.insert(component.clone(), path);
                }
                None => missing.push(component.clone()),
            }
        }
        missing
    }
}

/// Find an executable by name in `search_path`, or check it directly if it
/// is a path
pub fn find_executable(name: &str, search_path: &[PathBuf]) -> Option<PathBuf> {
    if name.contains(std::path::MAIN_SEPARATOR) {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }

    search_path
        .iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
