//! cliclack theme

use cliclack::ThemeState;
use console::Style;

/// Dockyard's prompt theme: blue while active, green once answered
#[derive(Debug, Clone, Default)]
pub struct DockyardTheme;

impl DockyardTheme {
    fn style_for(state: &ThemeState, submitted: Style) -> Style {
        match state {
            ThemeState::Active => Style::new().blue(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => submitted,
        }
    }
}

impl cliclack::Theme for DockyardTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        Self::style_for(state, Style::new().blue().dim())
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        Self::style_for(state, Style::new().green())
    }
}

/// Install the theme for all prompts
pub fn init_theme() {
    cliclack::set_theme(DockyardTheme);
}
