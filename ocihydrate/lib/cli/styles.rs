use std::{fmt::Write, io::IsTerminal, sync::LazyLock};

use clap::builder::styling::{AnsiColor, Effects, Style, Styles};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Whether stderr is an interactive terminal that understands ANSI escapes
static IS_ANSI_TERMINAL: LazyLock<bool> = LazyLock::new(|| {
    std::io::stderr().is_terminal() && std::env::var("TERM").map_or(true, |t| t != "dumb")
});

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns a `Styles` object with the default styles for the CLI.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
}

fn apply_style(text: &str, style: &Style, enabled: bool) -> String {
    if !enabled {
        return text.to_string();
    }

    let mut styled = String::with_capacity(text.len() + 20);
    let _ = write!(styled, "{style}{text}{}", style.render_reset());
    styled
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Applies the CLI [`styles`] to text printed outside of clap, when the terminal supports it.
pub trait AnsiStyles {
    /// Apply error style to text
    fn error(&self) -> String;

    /// Apply literal style to text
    fn literal(&self) -> String;

    /// Apply valid style to text
    fn valid(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<T: AsRef<str> + ?Sized> AnsiStyles for T {
    fn error(&self) -> String {
        apply_style(self.as_ref(), styles().get_error(), *IS_ANSI_TERMINAL)
    }

    fn literal(&self) -> String {
        apply_style(self.as_ref(), styles().get_literal(), *IS_ANSI_TERMINAL)
    }

    fn valid(&self) -> String {
        apply_style(self.as_ref(), styles().get_valid(), *IS_ANSI_TERMINAL)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
