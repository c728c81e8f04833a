//! Console output for the pre- and post-phase
//!
//! Under the GitHub Actions runner, sections become collapsible log groups
//! and warnings become annotations. Elsewhere they render as styled or
//! plain text.
//!
//! # Example
//!
//! ```rust,ignore
//! use setup_bazel::ui::{self, UiContext};
//!
//! let ctx = UiContext::detect();
//! {
//!     let _group = ui::group("Restore repository cache");
//!     // ... do work ...
//! }
//! ui::warning("Sticky disk unmount failed");
//! ui::key_value(&ctx, "output_base", "/home/runner/.bazel");
//! ```

mod context;
mod output;

pub use context::{OutputMode, UiContext};
pub use output::{group, key_value, step_info, step_ok, warning, LogGroup};
