//! Run command - build the image and serve it

use super::build::{build, summarize};
use super::{pipeline, ProjectContext};
use crate::cli::args::RunArgs;
use crate::error::DockyardResult;
use crate::service::StopReason;
use crate::ui::{self, Status, TaskSpinner, UiContext};

/// Execute the run command
pub async fn execute(args: RunArgs, project: &ProjectContext) -> DockyardResult<()> {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "dockyard run");

    let (mut pipeline, outcome) = build(&ctx, pipeline(&project.config), args.fresh).await?;
    summarize(&ctx, &outcome);

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!(
        "Starting {} on {}",
        project.config.service.entry,
        project.config.service.bind_addr()
    ));
    let service = match pipeline.serve(&outcome).await {
        Ok(service) => service,
        Err(e) => {
            spinner.stop_error(e.kind());
            return Err(e);
        }
    };
    spinner.stop(&format!(
        "Serving {} on {}",
        service.entry().locator,
        service.local_addr()
    ));
    ui::remark(&ctx, "Press Ctrl-C to stop");

    match service.wait_for_shutdown().await? {
        StopReason::Signal => ui::outro(&ctx, Status::Ok, "Service stopped"),
        StopReason::WorkerExited => ui::outro(&ctx, Status::Warn, "Worker exited"),
    }
    Ok(())
}
