//! Dependency installation
//!
//! Installs every locked package into one shared `site/` directory of the
//! image. The layer is keyed by the toolchain fingerprint and the lock
//! file's content hash, so an unchanged lock file reuses the previous
//! install without fetching anything.
//!
//! All artifacts are fetched and verified before anything is written, and
//! writing happens in a staging directory that is only promoted once every
//! package is in place. A failure at any point leaves no package behind.

use crate::command;
use crate::config::schema::{DependenciesConfig, RuntimeConfig};
use crate::error::{DockyardError, DockyardResult};
use crate::fetch::{artifact_file_name, artifact_url, ArtifactFetcher};
use crate::layer::{BuildLayer, Fingerprinter, LayerStore, LayerWork};
use crate::lock::{LockEntry, LockSet};
use crate::pipeline::{Stage, StageOutcome};
use crate::runtime::{InstalledPackage, RuntimeEnvironment};
use crate::toolchain::ToolchainReport;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

/// Shared package namespace inside the layer
pub const SITE_DIR: &str = "site";

/// Record of installed packages inside the layer
const MANIFEST_FILE: &str = "manifest.json";

/// Per-package metadata written next to the artifact
const PACKAGE_FILE: &str = "PACKAGE.json";

/// Manifest entry for one installed package
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PackageRecord {
    name: String,
    version: String,
    digest: String,
    /// Directory under `site/`
    dir: String,
    /// Artifact file name inside `dir`
    artifact: String,
}

/// Installs a lock set into the image
pub struct Installer<'a> {
    config: &'a DependenciesConfig,
    runtime: &'a RuntimeConfig,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl<'a> Installer<'a> {
    pub fn new(
        config: &'a DependenciesConfig,
        runtime: &'a RuntimeConfig,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            config,
            runtime,
            fetcher,
        }
    }

    /// Fingerprint of the dependency layer on top of `toolchain_layer`
    pub fn fingerprint(&self, lock: &LockSet, toolchain_layer: &BuildLayer) -> String {
        let mut fp = Fingerprinter::new("dependencies").parent(&toolchain_layer.fingerprint);
        fp.input("lock", lock.content_hash.as_bytes());
        if !self.config.install_command.is_empty() {
            fp.input("hook", self.config.install_command.join("\0").as_bytes());
        }
        fp.finish()
    }

    /// Install every entry, or reuse the cached layer
    pub async fn install(
        &self,
        store: &mut LayerStore,
        lock: &LockSet,
        toolchain_layer: &BuildLayer,
        toolchain: &ToolchainReport,
    ) -> DockyardResult<(RuntimeEnvironment, StageOutcome)> {
        let fingerprint = self.fingerprint(lock, toolchain_layer);

        if let Some(layer) = store.lookup(Stage::Dependencies, &fingerprint).cloned() {
            let records = read_manifest(&layer.output).await?;
            info!(
                "Dependencies unchanged (lock {}), reusing {} packages",
                lock.short_hash(),
                records.len()
            );
            let environment = self.environment(store.root(), &layer, lock, toolchain, &records);
            return Ok((
                environment,
                StageOutcome {
                    stage: Stage::Dependencies,
                    layer,
                    cached: true,
                },
            ));
        }

        info!(
            "Installing {} packages from {} ({})",
            lock.len(),
            lock.path.display(),
            self.fetcher.backend_name()
        );
        let artifacts = self.fetch_verified(lock).await?;

        let work = store.begin(Stage::Dependencies, &fingerprint).await?;
        let records = match self.write_packages(&work, lock, artifacts).await {
            Ok(records) => records,
            Err(e) => {
                store.abort(work).await;
                return Err(e);
            }
        };
        let layer = store.commit(work).await?;

        let environment = self.environment(store.root(), &layer, lock, toolchain, &records);
        Ok((
            environment,
            StageOutcome {
                stage: Stage::Dependencies,
                layer,
                cached: false,
            },
        ))
    }

    /// Fetch everything concurrently, then verify in declared order.
    ///
    /// Waits for every fetch before judging; the first failure in lock
    /// order is reported.
    async fn fetch_verified(&self, lock: &LockSet) -> DockyardResult<Vec<Vec<u8>>> {
        let fetcher = &self.fetcher;
        let mut results: Vec<(usize, DockyardResult<Vec<u8>>)> =
            stream::iter(lock.entries.iter().enumerate())
                .map(|(index, entry)| async move {
                    debug!("Fetching {} {}", entry.name, entry.version);
                    (index, fetcher.fetch(entry).await)
                })
                .buffer_unordered(self.config.jobs.max(1))
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut artifacts = Vec::with_capacity(results.len());
        for ((_, result), entry) in results.into_iter().zip(&lock.entries) {
            let bytes = result?;
            verify(entry, &bytes)?;
            artifacts.push(bytes);
        }
        Ok(artifacts)
    }

    async fn write_packages(
        &self,
        work: &LayerWork,
        lock: &LockSet,
        artifacts: Vec<Vec<u8>>,
    ) -> DockyardResult<Vec<PackageRecord>> {
        let site = work.staging.join(SITE_DIR);
        create_dir(&site).await?;

        let hook_env = if self.config.install_command.is_empty() {
            BTreeMap::new()
        } else {
            let staging_env = RuntimeEnvironment {
                site_dir: site.clone(),
                ..Default::default()
            };
            let mut env = staging_env.worker_env(self.runtime)?;
            env.extend(self.config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
            env
        };

        let mut records = Vec::with_capacity(lock.len());
        for (entry, bytes) in lock.entries.iter().zip(artifacts) {
            let dir = entry.install_dir_name();
            let package_dir = site.join(&dir);
            create_dir(&package_dir).await?;

            let url = artifact_url(&self.config.url_template, &self.config.index_url, entry);
            let artifact = artifact_file_name(&url);
            let artifact_path = package_dir.join(&artifact);
            write_file(&artifact_path, &bytes).await?;

            let record = PackageRecord {
                name: entry.name.clone(),
                version: entry.version.to_string(),
                digest: entry.digest.to_string(),
                dir,
                artifact,
            };
            write_file(
                &package_dir.join(PACKAGE_FILE),
                serde_json::to_string_pretty(&record)?.as_bytes(),
            )
            .await?;

            if !self.config.install_command.is_empty() {
                self.run_hook(entry, &artifact_path, &site, &hook_env).await?;
            }

            debug!("Installed {} {}", entry.name, entry.version);
            records.push(record);
        }

        write_file(
            &work.staging.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&records)?.as_bytes(),
        )
        .await?;

        Ok(records)
    }

    async fn run_hook(
        &self,
        entry: &LockEntry,
        artifact: &Path,
        site: &Path,
        env: &BTreeMap<String, String>,
    ) -> DockyardResult<()> {
        let artifact = artifact.display().to_string();
        let site = site.display().to_string();
        let version = entry.version.to_string();
        let argv = command::substitute(
            &self.config.install_command,
            &[
                ("artifact", artifact.as_str()),
                ("site", site.as_str()),
                ("name", entry.name.as_str()),
                ("version", version.as_str()),
            ],
        );
        command::exec(&argv, env).await?;
        Ok(())
    }

    fn environment(
        &self,
        root: &Path,
        layer: &BuildLayer,
        lock: &LockSet,
        toolchain: &ToolchainReport,
        records: &[PackageRecord],
    ) -> RuntimeEnvironment {
        let site_dir = layer.output.join(SITE_DIR);
        let packages = records
            .iter()
            .map(|r| InstalledPackage {
                name: r.name.clone(),
                version: r.version.clone(),
                path: site_dir.join(&r.dir),
            })
            .collect();

        let mut env = BTreeMap::new();
        env.insert("DOCKYARD_ROOT".to_string(), root.display().to_string());
        env.insert("DOCKYARD_LOCK".to_string(), lock.short_hash().to_string());

        RuntimeEnvironment {
            root: root.to_path_buf(),
            site_dir,
            app_dir: None,
            toolchain: toolchain.components.clone(),
            env,
            packages,
        }
    }
}

fn verify(entry: &LockEntry, bytes: &[u8]) -> DockyardResult<()> {
    entry
        .digest
        .verify(bytes)
        .map_err(|actual| DockyardError::IntegrityViolation {
            package: entry.name.clone(),
            expected: entry.digest.to_string(),
            actual: actual.to_string(),
        })
}

async fn read_manifest(output: &Path) -> DockyardResult<Vec<PackageRecord>> {
    let path = output.join(MANIFEST_FILE);
    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| DockyardError::io(format!("reading {}", path.display()), e))?;
    Ok(serde_json::from_str(&content)?)
}

async fn create_dir(path: &Path) -> DockyardResult<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| DockyardError::io(format!("creating {}", path.display()), e))
}

async fn write_file(path: &Path, bytes: &[u8]) -> DockyardResult<()> {
    fs::write(path, bytes)
        .await
        .map_err(|e| DockyardError::io(format!("writing {}", path.display()), e))
}
