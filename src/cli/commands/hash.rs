//! Hash command - print the content hash of a file set

use crate::cache::FileSetHasher;
use crate::cli::args::{HashArgs, OutputFormat};
use crate::error::{SetupError, SetupResult};
use std::path::PathBuf;

/// Execute the hash command
pub async fn execute(args: HashArgs) -> SetupResult<()> {
    let root = match args.root {
        Some(root) => root,
        None => std::env::current_dir()
            .map_err(|e| SetupError::io("getting current directory", e))?,
    };
    let hasher = FileSetHasher::new(root).follow_symlinks(args.follow_symlinks);
    let patterns = args.patterns;

    let (hash, files) = tokio::task::spawn_blocking(move || -> SetupResult<_> {
        let files = hasher.matching_files(&patterns)?;
        let hash = hasher.hash(&patterns)?;
        Ok((hash, files))
    })
    .await
    .map_err(|e| SetupError::Internal(format!("hash task failed: {}", e)))??;

    match args.format {
        OutputFormat::Plain => {
            if args.files {
                for file in &files {
                    println!("{}", file.display());
                }
            }
            println!("{}", hash);
        }
        OutputFormat::Json => print_json(&hash, &files, args.files)?,
    }
    Ok(())
}

fn print_json(hash: &str, files: &[PathBuf], include_files: bool) -> SetupResult<()> {
    let mut output = serde_json::json!({
        "hash": hash,
        "count": files.len(),
    });
    if include_files {
        output["files"] = files
            .iter()
            .map(|f| f.to_string_lossy().into_owned())
            .collect();
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
