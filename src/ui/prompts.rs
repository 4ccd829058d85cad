//! Confirmation prompts with non-interactive fallback

use super::context::UiContext;
use crate::error::{DockyardError, DockyardResult};

/// Ask for confirmation.
///
/// `--yes` answers true; without a terminal the default is returned.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> DockyardResult<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message).initial_value(default).interact()
    })
    .await
    .map_err(|e| DockyardError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| DockyardError::User(format!("Prompt cancelled: {}", e)))
}
