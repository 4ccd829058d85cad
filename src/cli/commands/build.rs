//! Build command - run the pipeline up to a staged image

use super::{pipeline, ProjectContext};
use crate::cli::args::BuildArgs;
use crate::error::DockyardResult;
use crate::pipeline::{BuildOutcome, Pipeline, Stage, StageOutcome};
use crate::ui::{self, BuildProgress, Status, UiContext};

/// Execute the build command
pub async fn execute(args: BuildArgs, project: &ProjectContext) -> DockyardResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "dockyard build");

    let pipeline = pipeline(&project.config);
    let (_, outcome) = build(&ctx, pipeline, args.fresh).await?;

    summarize(&ctx, &outcome);
    ui::outro(&ctx, Status::Ok, &format!("Image ready ({})", outcome.state));
    Ok(())
}

/// Run the build stages with progress output.
///
/// Returns the pipeline so the caller can continue into the service stage.
pub(crate) async fn build(
    ctx: &UiContext,
    pipeline: Pipeline,
    fresh: bool,
) -> DockyardResult<(Pipeline, BuildOutcome)> {
    let progress = BuildProgress::new(ctx, "image");
    let observer = progress.clone();
    let mut pipeline = pipeline.with_observer(Box::new(move |outcome: &StageOutcome| {
        observer.on_stage(outcome)
    }));

    let result = pipeline.build(fresh).await;
    progress.finish();
    Ok((pipeline, result?))
}

pub(crate) fn summarize(ctx: &UiContext, outcome: &BuildOutcome) {
    for stage in &outcome.stages {
        let how = if stage.cached { "reused" } else { "built" };
        let detail = match stage.stage {
            Stage::Toolchain => format!("{} components", outcome.toolchain.components.len()),
            Stage::Dependencies => format!("{} packages", outcome.environment.packages.len()),
            Stage::Source | Stage::Service => stage.layer.output.display().to_string(),
        };
        ui::step_ok(
            ctx,
            &format!(
                "{} {} [{}] {}",
                stage.stage,
                how,
                stage.layer.short_fingerprint(),
                detail
            ),
        );
    }
    if !outcome.toolchain.installed.is_empty() {
        ui::step_info(
            ctx,
            &format!("Installed system packages: {}", outcome.toolchain.installed.join(", ")),
        );
    }
}
