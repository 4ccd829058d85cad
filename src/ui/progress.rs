//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::pipeline::StageOutcome;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Stages a build reports progress for
const BUILD_STAGES: u64 = 3;

/// Build progress across pipeline stages.
///
/// An indicatif bar in interactive mode, one line per stage otherwise.
#[derive(Clone)]
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = ctx.use_fancy_output().then(|| {
            let bar = ProgressBar::new(BUILD_STAGES);
            let style = ProgressStyle::default_bar()
                .template("  {spinner:.blue} {prefix}  {bar:20.blue/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("━╸─");
            bar.set_style(style);
            bar.set_prefix(label.to_string());
            bar.set_message("toolchain");
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Self { bar }
    }

    /// Record a finished stage
    pub fn on_stage(&self, outcome: &StageOutcome) {
        let how = if outcome.cached { "cached" } else { "built" };
        match self.bar {
            Some(ref bar) => {
                bar.inc(1);
                bar.set_message(format!("{} {}", outcome.stage, how));
            }
            None => println!(
                "  {} {} {} ({})",
                style("[OK]").green(),
                outcome.stage,
                how,
                outcome.layer.short_fingerprint()
            ),
        }
    }

    /// Remove the bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

/// A single-task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => println!("{} {}", style("[FAIL]").red(), message),
        }
    }
}
