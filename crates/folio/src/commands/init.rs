//! Scaffold folio in a book repository.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Run the init command.
pub async fn run(yes: bool) -> Result<()> {
    tracing::info!("Initializing folio...");

    scaffold(Path::new("."), yes)?;

    tracing::info!("Initialization complete!");
    tracing::info!("Run 'folio build' to build the site.");

    Ok(())
}

fn scaffold(root: &Path, yes: bool) -> Result<()> {
    write_file(&root.join("folio.toml"), DEFAULT_CONFIG, yes)?;
    write_file(&root.join(".env"), DEFAULT_ENV, yes)?;

    let assets_dir = root.join("assets");
    if !assets_dir.exists() {
        fs::create_dir_all(&assets_dir).context("Failed to create assets directory")?;
        tracing::info!("Created assets/");
    }

    Ok(())
}

fn write_file(path: &Path, content: &str, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        tracing::warn!("{} already exists. Use --yes to overwrite.", path.display());
        return Ok(());
    }

    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Created {}", path.display());
    Ok(())
}

const DEFAULT_ENV: &str = "MDBOOK_VERSION=0.4.25\n";

const DEFAULT_CONFIG: &str = r#"# Folio Configuration

[book]
# Directory containing book.toml
src = "."

# Generator output directory
output = "book"

# Static files copied into <output>/assets
assets = "assets"

[generator]
# File declaring the generator version
env_file = ".env"
version_key = "MDBOOK_VERSION"

# Install the declared version with cargo (false: use `binary` as found)
install = true
tools_dir = ".folio/tools"

[artifact]
name = "github-pages"
dir = ".folio/artifacts"

# `folio run` builds each run in its own <runs_dir>/<run id>
runs_dir = ".folio/runs"

[deploy]
# Only pushes to this branch publish
branch = "main"
group = "pages"
environment = "github-pages"

# "http" publishes to `endpoint`; "directory" unpacks into `target`
platform = "http"
endpoint = ""
target = "public"
base_url = ""

# "oidc" requests a CI identity token; "static" is for local targets
token = "oidc"
audience = "folio-pages"
"#;
