//! Cache command - inspect or discard build layers

use super::ProjectContext;
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::error::DockyardResult;
use crate::layer::{BuildLayer, LayerState, LayerStore};
use crate::ui::{self, UiContext};
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, project: &ProjectContext) -> DockyardResult<()> {
    match args.action {
        CacheAction::List { format, .. } => list_layers(project, format).await,
        CacheAction::Clear { yes, .. } => clear(project, yes).await,
    }
}

async fn list_layers(project: &ProjectContext, format: OutputFormat) -> DockyardResult<()> {
    let root = &project.config.image.root;
    let layers = if root.join("build.json").exists() {
        LayerStore::open(root).await?.state().layers.clone()
    } else {
        Vec::new()
    };

    if layers.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => ui::step_info(&UiContext::detect(), "No build layers"),
        }
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&layers),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&layers)?),
        OutputFormat::Plain => {
            for layer in &layers {
                println!("{}", layer.output.display());
            }
        }
    }
    Ok(())
}

fn print_table(layers: &[BuildLayer]) {
    println!(
        "{:<14} {:<14} {:<10} {:<18} {}",
        "STAGE", "FINGERPRINT", "STATE", "CREATED", "OUTPUT"
    );
    println!("{}", "-".repeat(90));

    for layer in layers {
        let state = match layer.state {
            LayerState::Complete => style("complete").green().to_string(),
            LayerState::Building => style("building").yellow().to_string(),
        };
        println!(
            "{:<14} {:<14} {:<10} {:<18} {}",
            layer.stage.to_string(),
            layer.short_fingerprint(),
            state,
            layer.created_at.format("%Y-%m-%d %H:%M"),
            layer.output.display()
        );
    }

    println!();
    println!("Total: {} layer(s)", layers.len());
}

async fn clear(project: &ProjectContext, yes: bool) -> DockyardResult<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let root = &project.config.image.root;

    if !root.exists() {
        ui::step_info(&ctx, "Nothing to clear");
        return Ok(());
    }

    let prompt = format!("Delete build root {} and all its layers?", root.display());
    if !ui::confirm(&ctx, &prompt, false).await? {
        ui::step_info(&ctx, "Cancelled");
        if !ctx.is_interactive() {
            ui::remark(&ctx, "Pass --yes to clear without a prompt");
        }
        return Ok(());
    }

    LayerStore::clear(root).await?;
    ui::step_ok(&ctx, &format!("Removed {}", root.display()));
    Ok(())
}
