//! Status command - show the last build of this project

use super::ProjectContext;
use crate::cli::args::ProjectArgs;
use crate::error::DockyardResult;
use crate::layer::{LayerState, LayerStore};
use crate::lock::LockSet;
use crate::pipeline::PipelineState;
use crate::ui::{self, Status, UiContext};

/// Execute the status command
pub async fn execute(_args: ProjectArgs, project: &ProjectContext) -> DockyardResult<()> {
    let ctx = UiContext::detect();
    let config = &project.config;
    ui::intro(&ctx, "dockyard status");

    ui::section(&ctx, "Project");
    ui::key_value(&ctx, "Directory", &project.project_dir.display().to_string());
    ui::key_value(
        &ctx,
        "Config",
        &project
            .local_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(global only)".to_string()),
    );
    ui::key_value(&ctx, "Entry", &config.service.entry);
    ui::key_value(&ctx, "Bind", &config.service.bind_addr());

    ui::section(&ctx, "Lock file");
    match LockSet::read(&config.dependencies.lockfile) {
        Ok(lock) => ui::step(
            &ctx,
            Status::Ok,
            &format!("{} packages, hash {}", lock.len(), lock.short_hash()),
        ),
        Err(e) => ui::step(&ctx, Status::Fail, &e.to_string()),
    }

    ui::section(&ctx, "Build");
    if !config.image.root.join("build.json").exists() {
        ui::step_info(&ctx, "No build yet");
        ui::remark(&ctx, "Run: dockyard build");
        return Ok(());
    }

    let store = LayerStore::open(&config.image.root).await?;
    let state = store.state();
    let reached = if state.reached >= PipelineState::SourceStaged {
        Status::Ok
    } else {
        Status::Warn
    };
    ui::step(&ctx, reached, &format!("Reached {}", state.reached));
    ui::key_value(&ctx, "Build", &state.build_id.to_string());
    ui::key_value(
        &ctx,
        "Updated",
        &state.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    );

    for layer in &state.layers {
        let status = match layer.state {
            LayerState::Complete => Status::Ok,
            LayerState::Building => Status::Warn,
        };
        ui::step(
            &ctx,
            status,
            &format!("{:<13} {} {}", layer.stage, layer.short_fingerprint(), layer.state),
        );
    }

    Ok(())
}
