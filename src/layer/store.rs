//! Layer store and build state persistence
//!
//! Layout under the build root:
//!
//! ```text
//! <root>/build.json              build state (layer records)
//! <root>/layers/<stage>-<hash>/  committed layer outputs
//! <root>/tmp/                    staging for layers in progress
//! ```
//!
//! Work is staged under `tmp/` and renamed into `layers/` only on commit,
//! so a failed stage never leaves a partial layer behind.

use super::{BuildLayer, LayerState};
use crate::error::{DockyardError, DockyardResult};
use crate::pipeline::{PipelineState, Stage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const STATE_FILE: &str = "build.json";
const LAYERS_DIR: &str = "layers";
const TMP_DIR: &str = "tmp";

/// Persisted record of the last build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildState {
    /// Identifier of the last build started in this root
    pub build_id: Uuid,
    /// Furthest pipeline state the last build reached
    pub reached: PipelineState,
    /// Layer records, at most one per stage
    pub layers: Vec<BuildLayer>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Default for BuildState {
    fn default() -> Self {
        Self {
            build_id: Uuid::new_v4(),
            reached: PipelineState::Uninitialized,
            layers: vec![],
            updated_at: Utc::now(),
        }
    }
}

impl BuildState {
    /// Record for a stage, if any
    pub fn layer(&self, stage: Stage) -> Option<&BuildLayer> {
        self.layers.iter().find(|l| l.stage == stage)
    }
}

/// A layer being built
#[derive(Debug)]
pub struct LayerWork {
    pub stage: Stage,
    pub fingerprint: String,
    /// Directory to write the layer's contents into
    pub staging: PathBuf,
    /// Record this work replaces, restored on abort
    previous: Option<BuildLayer>,
}

/// Layer storage rooted at an image's build root
pub struct LayerStore {
    root: PathBuf,
    state: BuildState,
}

impl LayerStore {
    /// Open (or create) the store at `root`.
    ///
    /// Leftover staging directories and layer outputs no record refers to
    /// are removed.
    pub async fn open(root: &Path) -> DockyardResult<Self> {
        for dir in [root.join(LAYERS_DIR), root.join(TMP_DIR)] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| DockyardError::io(format!("creating {}", dir.display()), e))?;
        }

        let state_path = root.join(STATE_FILE);
        let state = if state_path.exists() {
            let content = fs::read_to_string(&state_path).await.map_err(|e| {
                DockyardError::io(format!("reading build state {}", state_path.display()), e)
            })?;
            match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!("Discarding unreadable build state {}: {}", state_path.display(), e);
                    BuildState::default()
                }
            }
        } else {
            BuildState::default()
        };

        let store = Self {
            root: root.to_path_buf(),
            state,
        };
        store.collect_garbage().await;
        Ok(store)
    }

    /// Build root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current build state
    pub fn state(&self) -> &BuildState {
        &self.state
    }

    /// A committed layer for `stage` matching `fingerprint`
    pub fn lookup(&self, stage: Stage, fingerprint: &str) -> Option<&BuildLayer> {
        self.state
            .layer(stage)
            .filter(|l| l.is_reusable_for(fingerprint))
    }

    /// Start a new build: fresh id, state reset to `Uninitialized`
    pub async fn start_build(&mut self) -> DockyardResult<Uuid> {
        self.state.build_id = Uuid::new_v4();
        self.state.reached = PipelineState::Uninitialized;
        self.save().await?;
        Ok(self.state.build_id)
    }

    /// Record the furthest pipeline state reached
    pub async fn set_reached(&mut self, reached: PipelineState) -> DockyardResult<()> {
        self.state.reached = reached;
        self.save().await
    }

    /// Mark `stage` as building and allocate a staging directory
    pub async fn begin(&mut self, stage: Stage, fingerprint: &str) -> DockyardResult<LayerWork> {
        let staging = self
            .root
            .join(TMP_DIR)
            .join(format!("{}-{}", stage, Uuid::new_v4()));
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| DockyardError::io(format!("creating {}", staging.display()), e))?;

        let output = self
            .root
            .join(LAYERS_DIR)
            .join(BuildLayer::dir_name(stage, fingerprint));

        let record = BuildLayer {
            stage,
            fingerprint: fingerprint.to_string(),
            output,
            state: LayerState::Building,
            created_at: Utc::now(),
        };

        let previous = self.upsert(record);
        self.save().await?;
        debug!("Building {} layer in {}", stage, staging.display());

        Ok(LayerWork {
            stage,
            fingerprint: fingerprint.to_string(),
            staging,
            previous,
        })
    }

    /// Promote a staged layer and mark it complete.
    ///
    /// The output this stage replaced is deleted.
    pub async fn commit(&mut self, work: LayerWork) -> DockyardResult<BuildLayer> {
        let output = self
            .root
            .join(LAYERS_DIR)
            .join(BuildLayer::dir_name(work.stage, &work.fingerprint));

        if output.exists() {
            remove_dir(&output).await?;
        }
        fs::rename(&work.staging, &output).await.map_err(|e| {
            DockyardError::io(
                format!("promoting {} to {}", work.staging.display(), output.display()),
                e,
            )
        })?;

        let previous = work.previous.map(|l| l.output).filter(|p| *p != output);
        if let Some(previous) = previous {
            if previous.exists() {
                debug!("Discarding replaced layer {}", previous.display());
                remove_dir(&previous).await?;
            }
        }

        let record = BuildLayer {
            stage: work.stage,
            fingerprint: work.fingerprint,
            output,
            state: LayerState::Complete,
            created_at: Utc::now(),
        };
        self.upsert(record.clone());
        self.save().await?;

        Ok(record)
    }

    /// Throw away a staged layer.
    ///
    /// The stage's previous record is put back, so its output stays
    /// reusable. Without one the record stays `building`.
    pub async fn abort(&mut self, work: LayerWork) {
        if let Err(e) = fs::remove_dir_all(&work.staging).await {
            warn!("Failed to remove staging {}: {}", work.staging.display(), e);
        }

        if let Some(previous) = work.previous {
            debug!("Restoring {} layer {}", previous.stage, previous.short_fingerprint());
            self.upsert(previous);
            if let Err(e) = self.save().await {
                warn!("Failed to restore build state: {}", e);
            }
        }
    }

    /// Delete an entire build root
    pub async fn clear(root: &Path) -> DockyardResult<()> {
        if root.exists() {
            remove_dir(root).await?;
        }
        Ok(())
    }

    /// Replace the record for the layer's stage, returning the old record
    fn upsert(&mut self, layer: BuildLayer) -> Option<BuildLayer> {
        let index = self.state.layers.iter().position(|l| l.stage == layer.stage);
        let previous = index.map(|i| self.state.layers.remove(i));

        self.state.layers.push(layer);
        self.state.layers.sort_by_key(|l| l.stage);
        previous
    }

    async fn save(&mut self) -> DockyardResult<()> {
        self.state.updated_at = Utc::now();
        let path = self.root.join(STATE_FILE);
        let content = serde_json::to_string_pretty(&self.state)?;
        fs::write(&path, content)
            .await
            .map_err(|e| DockyardError::io(format!("writing build state {}", path.display()), e))
    }

    async fn collect_garbage(&self) {
        let referenced: HashSet<&Path> =
            self.state.layers.iter().map(|l| l.output.as_path()).collect();

        let tmp = self.root.join(TMP_DIR);
        let layers = self.root.join(LAYERS_DIR);

        for (dir, keep_referenced) in [(tmp, false), (layers, true)] {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if keep_referenced && referenced.contains(path.as_path()) {
                    continue;
                }
                debug!("Removing stale layer directory {}", path.display());
                if let Err(e) = fs::remove_dir_all(&path).await {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

async fn remove_dir(path: &Path) -> DockyardResult<()> {
    fs::remove_dir_all(path)
        .await
        .map_err(|e| DockyardError::io(format!("removing {}", path.display()), e))
}
