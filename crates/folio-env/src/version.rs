//! Pinned tool version resolution.

use std::fmt;
use std::path::{Path, PathBuf};

use semver::Version;

use crate::envfile::{EnvError, EnvFile};

/// A tool version pinned in an environment declaration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedVersion {
    /// Variable name the version was read from (e.g. `MDBOOK_VERSION`)
    pub key: String,

    /// The exact version to provision
    pub version: Version,

    /// File the declaration came from
    pub source: PathBuf,
}

impl PinnedVersion {
    /// Read `key` from the declaration file at `path`.
    ///
    /// There is no fallback: a missing file, a missing key, an empty value or
    /// a value that is not a semantic version is an error.
    pub fn resolve(path: &Path, key: &str) -> Result<Self, EnvError> {
        let env = EnvFile::load(path)?;
        Self::from_env(&env, key, path)
    }

    /// Extract `key` from already parsed declarations.
    pub fn from_env(env: &EnvFile, key: &str, source: &Path) -> Result<Self, EnvError> {
        let raw = env.get(key).ok_or_else(|| EnvError::MissingKey {
            key: key.to_string(),
            path: source.display().to_string(),
        })?;

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EnvError::EmptyValue {
                key: key.to_string(),
            });
        }

        // Release tags are often written with a leading `v`.
        let normalized = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let version = Version::parse(normalized).map_err(|e| EnvError::InvalidVersion {
            key: key.to_string(),
            value: raw.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            key: key.to_string(),
            version,
            source: source.to_path_buf(),
        })
    }

    /// The version as passed to installers, without a `v` prefix.
    pub fn version_string(&self) -> String {
        self.version.to_string()
    }
}

impl fmt::Display for PinnedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.version)
    }
}
