//! Source staging
//!
//! Copies the application tree into the image as `app/`. The layer is keyed
//! by the dependency fingerprint plus a hash of the tree, so editing source
//! rebuilds only this layer while a new lock file rebuilds both.

use crate::config::schema::SourceConfig;
use crate::error::{DockyardError, DockyardResult};
use crate::layer::{BuildLayer, Fingerprinter, LayerStore};
use crate::pipeline::{Stage, StageOutcome};
use crate::runtime::RuntimeEnvironment;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Staged application directory inside the layer
pub const APP_DIR: &str = "app";

/// Names never staged regardless of configuration
const ALWAYS_EXCLUDED: &[&str] = &[".git", ".dockyard"];

/// A file discovered in the source tree
#[derive(Debug)]
struct SourceFile {
    /// Path relative to the source root, `/`-separated
    relative: String,
    absolute: PathBuf,
}

/// Stages the application source
pub struct Stager<'a> {
    config: &'a SourceConfig,
    build_root: &'a Path,
}

impl<'a> Stager<'a> {
    pub fn new(config: &'a SourceConfig, build_root: &'a Path) -> Self {
        Self { config, build_root }
    }

    /// Copy the source tree into the image, or reuse the cached copy
    pub async fn stage(
        &self,
        store: &mut LayerStore,
        mut environment: RuntimeEnvironment,
        deps_layer: &BuildLayer,
    ) -> DockyardResult<(RuntimeEnvironment, StageOutcome)> {
        let source = self.config.dir.clone();
        let files = self.collect(&source).await?;
        let tree_hash = tree_hash(&files).await?;

        let mut fp = Fingerprinter::new("source").parent(&deps_layer.fingerprint);
        fp.input("tree", tree_hash.as_bytes());
        let fingerprint = fp.finish();

        if let Some(layer) = store.lookup(Stage::Source, &fingerprint).cloned() {
            info!("Source unchanged, reusing staged tree");
            environment.app_dir = Some(layer.output.join(APP_DIR));
            return Ok((
                environment,
                StageOutcome {
                    stage: Stage::Source,
                    layer,
                    cached: true,
                },
            ));
        }

        info!("Staging {} source files from {}", files.len(), source.display());
        let work = store.begin(Stage::Source, &fingerprint).await?;
        let app = work.staging.join(APP_DIR);
        if let Err(e) = copy_files(&files, &app).await {
            store.abort(work).await;
            return Err(e);
        }
        let layer = store.commit(work).await?;

        environment.app_dir = Some(layer.output.join(APP_DIR));
        Ok((
            environment,
            StageOutcome {
                stage: Stage::Source,
                layer,
                cached: false,
            },
        ))
    }

    fn is_excluded(&self, name: &str) -> bool {
        ALWAYS_EXCLUDED.contains(&name) || self.config.exclude.iter().any(|e| e == name)
    }

    /// Walk the tree in a stable order, skipping excluded names and the
    /// build root itself
    async fn collect(&self, source: &Path) -> DockyardResult<Vec<SourceFile>> {
        let is_dir = fs::metadata(source).await.map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            return Err(DockyardError::SourceCopyFailed {
                path: source.to_path_buf(),
                reason: "source directory does not exist".to_string(),
            });
        }

        let build_root = fs::canonicalize(self.build_root).await.ok();
        let mut files = Vec::new();
        let mut pending = vec![(source.to_path_buf(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            if let Some(ref root) = build_root {
                if fs::canonicalize(&dir).await.is_ok_and(|d| d == *root) {
                    continue;
                }
            }

            for entry in read_dir_sorted(&dir).await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if self.is_excluded(&name) {
                    continue;
                }
                let path = entry.path();
                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };

                let file_type = entry.file_type().await.map_err(|e| copy_error(&path, e))?;
                if file_type.is_dir() {
                    pending.push((path, relative));
                } else if file_type.is_file() {
                    files.push(SourceFile {
                        relative,
                        absolute: path,
                    });
                } else {
                    debug!("Skipping non-regular file {}", path.display());
                }
            }
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(files)
    }
}

async fn read_dir_sorted(dir: &Path) -> DockyardResult<Vec<fs::DirEntry>> {
    let mut reader = fs::read_dir(dir).await.map_err(|e| copy_error(dir, e))?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(|e| copy_error(dir, e))? {
        entries.push(entry);
    }
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

/// Hash of sorted relative paths and file contents
async fn tree_hash(files: &[SourceFile]) -> DockyardResult<String> {
    let mut hasher = Sha256::new();
    for file in files {
        let content = fs::read(&file.absolute)
            .await
            .map_err(|e| copy_error(&file.absolute, e))?;
        hasher.update((file.relative.len() as u64).to_le_bytes());
        hasher.update(file.relative.as_bytes());
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }
    Ok(hex::encode(hasher.finalize()))
}

async fn copy_files(files: &[SourceFile], dest: &Path) -> DockyardResult<()> {
    fs::create_dir_all(dest).await.map_err(|e| copy_error(dest, e))?;
    for file in files {
        let target = dest.join(&file.relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| copy_error(parent, e))?;
        }
        fs::copy(&file.absolute, &target)
            .await
            .map_err(|e| copy_error(&file.absolute, e))?;
    }
    Ok(())
}

fn copy_error(path: &Path, e: std::io::Error) -> DockyardError {
    DockyardError::SourceCopyFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}
