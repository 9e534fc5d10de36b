//! Build stage command.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::FolioConfig;

/// Run the build command.
pub async fn run(config_path: &Path, root: PathBuf, output: Option<PathBuf>) -> Result<()> {
    tracing::info!("Building site...");

    let config = FolioConfig::load(config_path)?;
    let result = config.build_stage(&root, output).run().await?;

    tracing::info!(
        "Built {} pages with {} assets in {}ms",
        result.pages,
        result.assets.files,
        result.duration_ms
    );
    tracing::info!(
        "Artifact: {} ({} files, {} bytes)",
        result.artifact.archive.display(),
        result.artifact.files,
        result.artifact.size
    );

    println!("{}", result.artifact.manifest_path().display());

    Ok(())
}
