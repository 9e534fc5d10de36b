//! Deploy stage command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use folio_build::Artifact;

use crate::config::FolioConfig;

/// Run the deploy command.
pub async fn run(config_path: &Path, root: PathBuf, manifest: PathBuf) -> Result<()> {
    let config = FolioConfig::load(config_path)?;

    let artifact = Artifact::load(&manifest)
        .with_context(|| format!("Failed to load artifact manifest {}", manifest.display()))?;
    let deployment = config.deployer(&root)?.deploy(&artifact).await?;

    tracing::info!(
        "Deployed {} to {} in {}ms",
        deployment.artifact,
        deployment.environment,
        deployment.duration_ms
    );

    println!("{}", deployment.url);

    Ok(())
}
