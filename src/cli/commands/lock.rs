//! Lock command - validate and list the lock file

use super::ProjectContext;
use crate::cli::args::{LockAction, LockArgs, OutputFormat};
use crate::error::DockyardResult;
use crate::lock::LockSet;
use crate::ui::{self, UiContext};
use console::style;

/// Execute the lock command
pub async fn execute(args: LockArgs, project: &ProjectContext) -> DockyardResult<()> {
    match args.action {
        LockAction::Check { format, .. } => check(project, format),
    }
}

fn check(project: &ProjectContext, format: OutputFormat) -> DockyardResult<()> {
    let lock = LockSet::read(&project.config.dependencies.lockfile)?;

    match format {
        OutputFormat::Table => print_table(&lock),
        OutputFormat::Json => print_json(&lock)?,
        OutputFormat::Plain => print_plain(&lock),
    }
    Ok(())
}

fn print_table(lock: &LockSet) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, &format!("Lock file {}", lock.path.display()));

    println!(
        "{:<32} {:<16} {}",
        style("PACKAGE").bold(),
        style("VERSION").bold(),
        style("DIGEST").bold()
    );
    println!("{}", "-".repeat(80));
    for entry in &lock.entries {
        let digest = entry.digest.to_string();
        let short = &digest[..digest.len().min(24)];
        println!("{:<32} {:<16} {}", entry.name, entry.version, short);
    }

    println!();
    ui::key_value(&ctx, "Packages", &lock.len().to_string());
    ui::key_value(&ctx, "Content hash", &lock.content_hash);
}

fn print_json(lock: &LockSet) -> DockyardResult<()> {
    let packages: Vec<serde_json::Value> = lock
        .entries
        .iter()
        .map(|e| {
            serde_json::json!({
                "name": e.name,
                "version": e.version.to_string(),
                "digest": e.digest.to_string(),
                "url": e.url,
            })
        })
        .collect();

    let doc = serde_json::json!({
        "path": lock.path,
        "content_hash": lock.content_hash,
        "packages": packages,
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn print_plain(lock: &LockSet) {
    for entry in &lock.entries {
        println!("{}=={}", entry.name, entry.version);
    }
}
