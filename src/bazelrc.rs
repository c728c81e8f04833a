//! Generated bazelrc
//!
//! Every recognized bazelrc path is rewritten with the output base startup
//! option followed by the configured lines, in order.

use crate::error::{SetupError, SetupResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Content of the generated file
pub fn render(output_base: &Path, lines: &[String]) -> String {
    let mut content = format!("startup --output_base={}\n", output_base.display());
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    content
}

/// Write the bazelrc to every path, creating parent directories
pub fn write_all(paths: &[PathBuf], output_base: &Path, lines: &[String]) -> SetupResult<()> {
    let content = render(output_base, lines);
    for path in paths {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SetupError::io(format!("creating {}", parent.display()), e))?;
        }
        fs::write(path, &content)
            .map_err(|e| SetupError::io(format!("writing {}", path.display()), e))?;
        info!("Wrote {}", path.display());
    }
    debug!("bazelrc:\n{}", content);
    Ok(())
}
