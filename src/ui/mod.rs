//! Terminal UI
//!
//! `cliclack` for framed interactive output and prompts, `indicatif` for
//! the build bar, plain bracketed lines in CI and non-TTY environments.

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro, remark, section, step, step_info, step_ok, step_warn, Status,
};
pub use progress::{BuildProgress, TaskSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, DockyardTheme};
