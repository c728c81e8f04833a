//! UI context for detecting the GitHub Actions runner vs a terminal

use std::io::IsTerminal;

/// How output should be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Workflow commands understood by the Actions runner (`::group::`)
    Actions,
    /// Styled sections for an interactive terminal
    Terminal,
    /// Plain text, e.g. when piped
    Plain,
}

/// UI context that determines output behavior
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    mode: OutputMode,
}

impl UiContext {
    /// Detect the current environment
    pub fn detect() -> Self {
        let mode = if std::env::var_os("GITHUB_ACTIONS").is_some() {
            OutputMode::Actions
        } else if std::io::stdout().is_terminal() {
            OutputMode::Terminal
        } else {
            OutputMode::Plain
        };
        Self { mode }
    }

    /// Create a context with a fixed mode
    pub fn with_mode(mode: OutputMode) -> Self {
        Self { mode }
    }

    /// The selected output mode
    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Whether workflow commands should be emitted
    pub fn is_actions(&self) -> bool {
        self.mode == OutputMode::Actions
    }

    /// Check if we should use fancy output (colors)
    pub fn use_fancy_output(&self) -> bool {
        self.mode == OutputMode::Terminal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_modes() {
        let ctx = UiContext::with_mode(OutputMode::Actions);
        assert!(ctx.is_actions());
        assert!(!ctx.use_fancy_output());

        let ctx = UiContext::with_mode(OutputMode::Terminal);
        assert!(!ctx.is_actions());
        assert!(ctx.use_fancy_output());
    }
}
