//! Build-and-bootstrap pipeline
//!
//! Runs the stages strictly in order:
//!
//! ```text
//! Uninitialized -> ToolchainReady -> DependenciesInstalled -> SourceStaged -> ServiceRunning
//! ```
//!
//! Transitions only move forward. A failing stage halts the pipeline in
//! its current state and the error is returned tagged with the stage.

use crate::audit::AuditLog;
use crate::config::Config;
use crate::error::{DockyardError, DockyardResult};
use crate::fetch::ArtifactFetcher;
use crate::install::Installer;
use crate::layer::{BuildLayer, LayerStore};
use crate::lock::LockSet;
use crate::runtime::RuntimeEnvironment;
use crate::service::{Bootstrapper, RunningService, Worker};
use crate::stage::Stager;
use crate::toolchain::{Provisioner, SystemPackages, ToolchainReport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// A pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Toolchain,
    Dependencies,
    Source,
    Service,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Toolchain => "toolchain",
            Self::Dependencies => "dependencies",
            Self::Source => "source",
            Self::Service => "service",
        };
        write!(f, "{}", name)
    }
}

/// Pipeline progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Uninitialized,
    ToolchainReady,
    DependenciesInstalled,
    SourceStaged,
    ServiceRunning,
}

impl PipelineState {
    /// The stage that moves the pipeline out of this state
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            Self::Uninitialized => Some(Stage::Toolchain),
            Self::ToolchainReady => Some(Stage::Dependencies),
            Self::DependenciesInstalled => Some(Stage::Source),
            Self::SourceStaged => Some(Stage::Service),
            Self::ServiceRunning => None,
        }
    }

    /// The state reached once `stage` succeeds
    pub fn after(stage: Stage) -> Self {
        match stage {
            Stage::Toolchain => Self::ToolchainReady,
            Stage::Dependencies => Self::DependenciesInstalled,
            Stage::Source => Self::SourceStaged,
            Stage::Service => Self::ServiceRunning,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "Uninitialized",
            Self::ToolchainReady => "ToolchainReady",
            Self::DependenciesInstalled => "DependenciesInstalled",
            Self::SourceStaged => "SourceStaged",
            Self::ServiceRunning => "ServiceRunning",
        };
        write!(f, "{}", name)
    }
}

/// Per-stage outcome of a build
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub layer: BuildLayer,
    /// Reused from cache rather than rebuilt
    pub cached: bool,
}

/// Result of running the build stages
#[derive(Debug)]
pub struct BuildOutcome {
    pub state: PipelineState,
    pub toolchain: ToolchainReport,
    pub environment: RuntimeEnvironment,
    pub stages: Vec<StageOutcome>,
}

impl BuildOutcome {
    /// Outcome for a single stage
    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Callback invoked after each build stage
pub type StageObserver = Box<dyn Fn(&StageOutcome) + Send + Sync>;

/// The build pipeline with its injected collaborators
pub struct Pipeline {
    config: Config,
    packages: Arc<dyn SystemPackages>,
    fetcher: Arc<dyn ArtifactFetcher>,
    audit: AuditLog,
    observer: Option<StageObserver>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        config: Config,
        packages: Arc<dyn SystemPackages>,
        fetcher: Arc<dyn ArtifactFetcher>,
        audit: AuditLog,
    ) -> Self {
        Self {
            config,
            packages,
            fetcher,
            audit,
            observer: None,
            state: PipelineState::Uninitialized,
        }
    }

    /// Report each finished stage to `observer`
    pub fn with_observer(mut self, observer: StageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Current pipeline state
    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every build stage up to `SourceStaged`.
    ///
    /// `fresh` discards the build root first so no layer is reused.
    pub async fn build(&mut self, fresh: bool) -> DockyardResult<BuildOutcome> {
        if self.state != PipelineState::Uninitialized {
            return Err(DockyardError::Internal(format!(
                "pipeline already advanced to {}",
                self.state
            )));
        }

        let root = self.config.image.root.clone();
        if fresh {
            info!("Discarding build root {}", root.display());
            LayerStore::clear(&root).await?;
        }
        let mut store = LayerStore::open(&root).await?;
        let build_id = store.start_build().await?;

        self.audit
            .log(
                "build.started",
                &serde_json::json!({ "build_id": build_id, "root": root }),
            )
            .await;

        let result = self.run_stages(&mut store).await;

        if let Err(ref e) = result {
            self.audit
                .log(
                    "build.failed",
                    &serde_json::json!({
                        "build_id": build_id,
                        "halted_at": self.state.to_string(),
                        "kind": e.kind(),
                        "error": e.to_string(),
                    }),
                )
                .await;
        }

        result
    }

    async fn run_stages(&mut self, store: &mut LayerStore) -> DockyardResult<BuildOutcome> {
        let mut stages = Vec::with_capacity(3);

        // Toolchain runs on every build, cached or not.
        let provisioner = Provisioner::new(&self.config.toolchain, self.packages.clone());
        let (toolchain, toolchain_layer) = provisioner
            .provision(store)
            .await
            .map_err(|e| e.in_stage(Stage::Toolchain))?;
        self.record(&toolchain_layer).await;
        stages.push(toolchain_layer.clone());
        self.advance(store, Stage::Toolchain).await?;

        let lock = LockSet::read(&self.config.dependencies.lockfile)
            .map_err(|e| e.in_stage(Stage::Dependencies))?;
        let installer = Installer::new(
            &self.config.dependencies,
            &self.config.runtime,
            self.fetcher.clone(),
        );
        let (environment, deps_layer) = installer
            .install(store, &lock, &toolchain_layer.layer, &toolchain)
            .await
            .map_err(|e| e.in_stage(Stage::Dependencies))?;
        self.record(&deps_layer).await;
        stages.push(deps_layer.clone());
        self.advance(store, Stage::Dependencies).await?;

        let stager = Stager::new(&self.config.source, &self.config.image.root);
        let (environment, source_layer) = stager
            .stage(store, environment, &deps_layer.layer)
            .await
            .map_err(|e| e.in_stage(Stage::Source))?;
        self.record(&source_layer).await;
        stages.push(source_layer);
        self.advance(store, Stage::Source).await?;

        Ok(BuildOutcome {
            state: self.state,
            toolchain,
            environment,
            stages,
        })
    }

    /// Move forward past `stage`; never backwards
    async fn advance(&mut self, store: &mut LayerStore, stage: Stage) -> DockyardResult<()> {
        if self.state.next_stage() != Some(stage) {
            return Err(DockyardError::Internal(format!(
                "stage {} cannot run from {}",
                stage, self.state
            )));
        }
        self.state = PipelineState::after(stage);
        store.set_reached(self.state).await?;
        info!("Pipeline reached {}", self.state);
        Ok(())
    }

    /// Start the configured worker on a built image
    pub async fn serve(&mut self, outcome: &BuildOutcome) -> DockyardResult<RunningService> {
        let worker = Bootstrapper::new(&self.config.service, &self.config.runtime).default_worker();
        self.serve_with(outcome, worker).await
    }

    /// Start `worker` on a built image; the service stage is terminal
    pub async fn serve_with(
        &mut self,
        outcome: &BuildOutcome,
        worker: Box<dyn Worker>,
    ) -> DockyardResult<RunningService> {
        if self.state.next_stage() != Some(Stage::Service) {
            return Err(DockyardError::Internal(format!(
                "service cannot start from {}",
                self.state
            )));
        }

        let bootstrapper = Bootstrapper::new(&self.config.service, &self.config.runtime);
        let service = match bootstrapper.start_with(&outcome.environment, worker).await {
            Ok(service) => service,
            Err(e) => {
                let e = e.in_stage(Stage::Service);
                self.audit
                    .log(
                        "build.failed",
                        &serde_json::json!({
                            "halted_at": self.state.to_string(),
                            "kind": e.kind(),
                            "error": e.to_string(),
                        }),
                    )
                    .await;
                return Err(e);
            }
        };

        let mut store = LayerStore::open(&self.config.image.root).await?;
        self.advance(&mut store, Stage::Service).await?;
        self.audit
            .log(
                "service.started",
                &serde_json::json!({
                    "addr": service.local_addr().to_string(),
                    "entry": service.entry().locator,
                }),
            )
            .await;

        Ok(service)
    }

    async fn record(&self, outcome: &StageOutcome) {
        if let Some(ref observer) = self.observer {
            observer(outcome);
        }
        let event = if outcome.cached { "layer.reused" } else { "layer.built" };
        self.audit
            .log(
                event,
                &serde_json::json!({
                    "stage": outcome.stage,
                    "fingerprint": outcome.layer.fingerprint,
                    "output": outcome.layer.output,
                }),
            )
            .await;
    }
}
