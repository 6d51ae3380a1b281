use owo_colors::Style;
use std::io::IsTerminal;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// Styles for each kind of CLI line
#[derive(Debug, Clone)]
pub struct Theme {
    pub heading: Style,
    /// Completed runs, written files
    pub ok: Style,
    /// Failed runs, errors
    pub failed: Style,
    /// Partial runs, skipped items, warnings
    pub partial: Style,
    pub accent: Style,
    pub label: Style,
    pub muted: Style,
}

impl Theme {
    /// Colored on a terminal, plain when piped or when `NO_COLOR` is set.
    pub fn detect() -> Self {
        let colored = std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal();
        Self::for_terminal(colored)
    }

    pub fn for_terminal(colored: bool) -> Self {
        if !colored {
            return Self {
                heading: Style::new(),
                ok: Style::new(),
                failed: Style::new(),
                partial: Style::new(),
                accent: Style::new(),
                label: Style::new(),
                muted: Style::new(),
            };
        }
        Self {
            heading: Style::new().cyan().bold(),
            ok: Style::new().green().bold(),
            failed: Style::new().red().bold(),
            partial: Style::new().yellow().bold(),
            accent: Style::new().magenta(),
            label: Style::new().white().dimmed(),
            muted: Style::new().bright_black(),
        }
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}
