//! Line-oriented CLI output
//!
//! Interactive terminals get cliclack's framed log; everything else gets
//! bracketed plain lines that read well in CI logs.

use super::context::UiContext;
use console::style;

/// Outcome class of a printed step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Info,
    Warn,
    Fail,
}

impl Status {
    fn tag(self) -> String {
        match self {
            Self::Ok => style("[OK]").green().to_string(),
            Self::Info => style("[INFO]").cyan().to_string(),
            Self::Warn => style("[WARN]").yellow().to_string(),
            Self::Fail => style("[FAIL]").red().to_string(),
        }
    }
}

/// Print a step with its status
pub fn step(ctx: &UiContext, status: Status, message: &str) {
    if ctx.use_fancy_output() {
        let _ = match status {
            Status::Ok => cliclack::log::success(message),
            Status::Info => cliclack::log::info(message),
            Status::Warn => cliclack::log::warning(message),
            Status::Fail => cliclack::log::error(message),
        };
    } else {
        println!("  {} {}", status.tag(), message);
    }
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    step(ctx, Status::Ok, message);
}

pub fn step_info(ctx: &UiContext, message: &str) {
    step(ctx, Status::Info, message);
}

pub fn step_warn(ctx: &UiContext, message: &str) {
    step(ctx, Status::Warn, message);
}

/// Opening banner
pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        let _ = cliclack::intro(style(title).blue().bold());
    } else {
        println!("{}", style(title).bold());
    }
}

/// Closing line
pub fn outro(ctx: &UiContext, status: Status, message: &str) {
    if ctx.use_fancy_output() {
        let styled = match status {
            Status::Ok => style(message).green().bold(),
            Status::Fail => style(message).red().bold(),
            Status::Warn => style(message).yellow().bold(),
            Status::Info => style(message).bold(),
        };
        let _ = cliclack::outro(styled);
    } else {
        println!("{} {}", status.tag(), message);
    }
}

/// Bold section heading
pub fn section(ctx: &UiContext, title: &str) {
    println!();
    if ctx.use_fancy_output() {
        let _ = cliclack::log::info(style(title).bold());
    } else {
        println!("{}", style(title).bold());
    }
}

/// Dimmed key, plain value
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}

/// Secondary hint line
pub fn remark(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        let _ = cliclack::log::remark(message);
    } else {
        println!("  {}", style(message).dim());
    }
}
