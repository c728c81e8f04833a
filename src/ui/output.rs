//! Output functions for consistent log formatting

use super::context::{OutputMode, UiContext};
use console::style;

/// Open a collapsible log group; closed when the guard drops
pub fn group(title: impl Into<String>) -> LogGroup {
    LogGroup::open(UiContext::detect(), title)
}

/// Guard for an open log group
#[must_use = "the group closes when this guard is dropped"]
pub struct LogGroup {
    ctx: UiContext,
}

impl LogGroup {
    /// Open a group rendered for `ctx`
    pub fn open(ctx: UiContext, title: impl Into<String>) -> Self {
        println!("{}", group_start(&ctx, &title.into()));
        Self { ctx }
    }
}

impl Drop for LogGroup {
    fn drop(&mut self) {
        if let Some(line) = group_end(&self.ctx) {
            println!("{}", line);
        }
    }
}

fn group_start(ctx: &UiContext, title: &str) -> String {
    match ctx.mode() {
        OutputMode::Actions => format!("::group::{}", title),
        OutputMode::Terminal => format!("{}", style(title).cyan().bold()),
        OutputMode::Plain => format!("== {}", title),
    }
}

fn group_end(ctx: &UiContext) -> Option<&'static str> {
    ctx.is_actions().then_some("::endgroup::")
}

/// Surface a warning in the log and, under Actions, in the run summary
pub fn warning(message: &str) {
    tracing::warn!("{}", message);
    let ctx = UiContext::detect();
    if let Some(line) = annotation(&ctx, message) {
        println!("{}", line);
    }
}

fn annotation(ctx: &UiContext, message: &str) -> Option<String> {
    // Annotations are single line
    ctx.is_actions()
        .then(|| format!("::warning::{}", message.replace('\n', "%0A")))
}

/// Display a success step
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {}", style("[OK]").green(), message);
    } else {
        println!("  [OK] {}", message);
    }
}

/// Display an info step
pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        println!("  {} {}", style("[INFO]").cyan(), message);
    } else {
        println!("  [INFO] {}", message);
    }
}

/// Print styled key-value pair
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}
