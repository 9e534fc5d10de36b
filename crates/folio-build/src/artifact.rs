//! Artifact packaging.
//!
//! An artifact is a zip archive of the finished output tree plus a JSON
//! manifest describing it. The manifest is the handle the deploy stage
//! receives; it may be produced and consumed by different processes.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::BuildError;

/// Metadata recorded alongside the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Generator version the pages were rendered with
    pub tool_version: String,

    /// Source commit, if known
    pub commit: Option<String>,
}

/// A packaged, immutable build output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact name (e.g. "github-pages")
    pub name: String,

    /// Path to the zip archive
    pub archive: PathBuf,

    /// Hex SHA-256 of the archive
    pub digest: String,

    /// Number of files in the archive
    pub files: usize,

    /// Archive size in bytes
    pub size: u64,

    #[serde(flatten)]
    pub meta: ArtifactMeta,
}

impl Artifact {
    /// Manifest path for an artifact named `name` in `dir`.
    pub fn manifest_path_in(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.json", name))
    }

    /// Path of this artifact's manifest.
    pub fn manifest_path(&self) -> PathBuf {
        let dir = self.archive.parent().unwrap_or(Path::new(""));
        Self::manifest_path_in(dir, &self.name)
    }

    /// Load an artifact handle from its manifest.
    pub fn load(manifest: &Path) -> Result<Self, BuildError> {
        let content = fs::read_to_string(manifest).map_err(|e| BuildError::read(manifest, e))?;
        serde_json::from_str(&content).map_err(|e| {
            BuildError::Package(format!("Invalid manifest {}: {}", manifest.display(), e))
        })
    }

    /// Check that the archive on disk still matches the recorded digest.
    pub fn verify(&self) -> Result<(), BuildError> {
        let actual = digest_file(&self.archive)?;
        if actual != self.digest {
            return Err(BuildError::Package(format!(
                "Digest mismatch for {}: expected {}, found {}",
                self.archive.display(),
                self.digest,
                actual
            )));
        }
        Ok(())
    }

    /// Read the archive bytes.
    pub fn read_archive(&self) -> Result<Vec<u8>, BuildError> {
        fs::read(&self.archive).map_err(|e| BuildError::read(&self.archive, e))
    }
}

/// Package `output_dir` as `<artifact_dir>/<name>.zip` and write its manifest.
///
/// Entries are stored in sorted order with paths relative to `output_dir`.
/// An output directory without files is rejected.
pub fn package(
    output_dir: &Path,
    artifact_dir: &Path,
    name: &str,
    meta: ArtifactMeta,
) -> Result<Artifact, BuildError> {
    if !output_dir.is_dir() {
        return Err(BuildError::Package(format!(
            "Output directory not found: {}",
            output_dir.display()
        )));
    }

    fs::create_dir_all(artifact_dir).map_err(|e| BuildError::write(artifact_dir, e))?;

    let archive = artifact_dir.join(format!("{}.zip", name));
    let file = File::create(&archive).map_err(|e| BuildError::write(&archive, e))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut files = 0;

    for entry in WalkDir::new(output_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| BuildError::read(output_dir, e))?;
        let relative = entry
            .path()
            .strip_prefix(output_dir)
            .map_err(|e| BuildError::read(entry.path(), e))?;

        if relative.as_os_str().is_empty() {
            continue;
        }

        let entry_name = zip_entry_name(relative);

        if entry.file_type().is_dir() {
            zip.add_directory(entry_name, options)
                .map_err(|e| BuildError::write(&archive, e))?;
            continue;
        }

        zip.start_file(entry_name, options)
            .map_err(|e| BuildError::write(&archive, e))?;
        let mut source = File::open(entry.path()).map_err(|e| BuildError::read(entry.path(), e))?;
        io::copy(&mut source, &mut zip).map_err(|e| BuildError::write(&archive, e))?;
        files += 1;
    }

    let mut file = zip.finish().map_err(|e| BuildError::write(&archive, e))?;
    file.flush().map_err(|e| BuildError::write(&archive, e))?;

    if files == 0 {
        // Nothing to publish; do not leave a misleading archive behind.
        let _ = fs::remove_file(&archive);
        return Err(BuildError::Package(format!(
            "Output directory is empty: {}",
            output_dir.display()
        )));
    }

    let size = fs::metadata(&archive)
        .map_err(|e| BuildError::read(&archive, e))?
        .len();

    let artifact = Artifact {
        name: name.to_string(),
        digest: digest_file(&archive)?,
        archive,
        files,
        size,
        meta,
    };

    let manifest = artifact.manifest_path();
    let json = serde_json::to_string_pretty(&artifact)
        .map_err(|e| BuildError::Package(e.to_string()))?;
    fs::write(&manifest, json).map_err(|e| BuildError::write(&manifest, e))?;

    tracing::info!(
        "Packaged {} files into {} ({} bytes, sha256 {})",
        artifact.files,
        artifact.archive.display(),
        artifact.size,
        artifact.digest
    );

    Ok(artifact)
}

/// Remove the archive and manifest of the artifact named `name`, if present.
pub fn discard(artifact_dir: &Path, name: &str) -> Result<(), BuildError> {
    let archive = artifact_dir.join(format!("{}.zip", name));
    let manifest = Artifact::manifest_path_in(artifact_dir, name);

    for path in [manifest, archive] {
        match fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed stale {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(BuildError::write(&path, e)),
        }
    }
    Ok(())
}

/// Hex SHA-256 digest of a file.
pub fn digest_file(path: &Path) -> Result<String, BuildError> {
    let mut file = File::open(path).map_err(|e| BuildError::read(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer).map_err(|e| BuildError::read(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Zip entry names always use `/` separators.
fn zip_entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
