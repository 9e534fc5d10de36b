//! Static asset overlay.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BuildError;

/// Outcome of copying the assets directory into the output tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetReport {
    /// Directory the assets were copied into
    pub target: PathBuf,

    /// Number of files copied
    pub files: usize,

    /// Total bytes copied
    pub bytes: u64,

    /// Output paths (relative to the output root) that already existed and were
    /// replaced by an asset
    pub replaced: Vec<PathBuf>,
}

/// Copy `assets_dir` recursively into `output_dir/<name of assets_dir>`.
///
/// Generator output is never deleted except where an asset occupies the same
/// path; there the asset wins. Entries are visited in sorted order so repeated
/// runs produce identical trees. A missing assets directory is an error.
pub fn copy_assets(assets_dir: &Path, output_dir: &Path) -> Result<AssetReport, BuildError> {
    if !assets_dir.is_dir() {
        return Err(BuildError::AssetsNotFound(assets_dir.display().to_string()));
    }

    let dir_name = assets_dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("assets"));
    let target = output_dir.join(&dir_name);

    let mut report = AssetReport {
        target: target.clone(),
        ..Default::default()
    };

    for entry in WalkDir::new(assets_dir)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| BuildError::read(assets_dir, e))?;
        let relative = entry
            .path()
            .strip_prefix(assets_dir)
            .map_err(|e| BuildError::read(entry.path(), e))?;
        let dest = target.join(relative);

        if entry.file_type().is_dir() {
            if dest.is_file() {
                fs::remove_file(&dest).map_err(|e| BuildError::write(&dest, e))?;
                report.replaced.push(dir_name.join(relative));
            }
            fs::create_dir_all(&dest).map_err(|e| BuildError::write(&dest, e))?;
            continue;
        }

        if dest.is_dir() {
            fs::remove_dir_all(&dest).map_err(|e| BuildError::write(&dest, e))?;
            report.replaced.push(dir_name.join(relative));
        } else if dest.exists() {
            report.replaced.push(dir_name.join(relative));
        }

        let bytes = fs::copy(entry.path(), &dest).map_err(|e| BuildError::write(&dest, e))?;
        report.files += 1;
        report.bytes += bytes;
    }

    for path in &report.replaced {
        tracing::warn!("Asset replaced generated output at {}", path.display());
    }

    tracing::info!(
        "Copied {} asset files ({} bytes) into {}",
        report.files,
        report.bytes,
        target.display()
    );

    Ok(report)
}
