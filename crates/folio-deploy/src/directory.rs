//! Publishing into a local directory served by a static web server.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use folio_build::Artifact;
use uuid::Uuid;

use crate::error::DeployError;
use crate::platform::HostingPlatform;
use crate::token::IdToken;

/// Publishes by unpacking into a staging directory and renaming it into place.
///
/// Readers of `target` see either the previous tree or the new one, never a
/// partially extracted archive.
#[derive(Debug, Clone)]
pub struct DirectoryPlatform {
    target: PathBuf,
    base_url: Option<String>,
    audience: String,
}

impl DirectoryPlatform {
    /// Publish into `target`, accepting tokens issued for `audience`.
    pub fn new(target: impl Into<PathBuf>, audience: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            base_url: None,
            audience: audience.into(),
        }
    }

    /// Public URL the target directory is served at.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = if base_url.is_empty() {
            None
        } else {
            Some(base_url)
        };
        self
    }

    fn sibling(&self, label: &str) -> Result<PathBuf, DeployError> {
        let parent = self.target.parent().unwrap_or(Path::new("."));
        let name = self
            .target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DeployError::Config(format!("Invalid publish target: {}", self.target.display()))
            })?;
        Ok(parent.join(format!(".{}.{}-{}", name, label, Uuid::new_v4())))
    }

    fn public_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.clone(),
            None => {
                let path = fs::canonicalize(&self.target).unwrap_or_else(|_| self.target.clone());
                format!("file://{}", path.display())
            }
        }
    }

    fn swap_in(&self, staging: &Path) -> Result<(), DeployError> {
        if !self.target.exists() {
            return fs::rename(staging, &self.target).map_err(target_error(&self.target));
        }

        let retired = self.sibling("retired")?;
        fs::rename(&self.target, &retired).map_err(target_error(&self.target))?;

        if let Err(e) = fs::rename(staging, &self.target) {
            return Err(restore(&retired, &self.target, e));
        }

        if let Err(e) = fs::remove_dir_all(&retired) {
            tracing::warn!("Failed to remove {}: {}", retired.display(), e);
        }
        Ok(())
    }
}

#[async_trait]
impl HostingPlatform for DirectoryPlatform {
    fn name(&self) -> &'static str {
        "directory"
    }

    async fn publish(
        &self,
        artifact: &Artifact,
        environment: &str,
        token: &IdToken,
    ) -> Result<String, DeployError> {
        if token.audience() != self.audience {
            return Err(DeployError::Unauthorized {
                environment: environment.to_string(),
                message: format!(
                    "token issued for '{}', expected '{}'",
                    token.audience(),
                    self.audience
                ),
            });
        }

        if let Some(parent) = self.target.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(target_error(parent))?;
            }
        }

        let staging = self.sibling("staging")?;
        let unpacked = File::open(&artifact.archive)
            .map_err(|e| DeployError::Target(format!("{}: {}", artifact.archive.display(), e)))
            .and_then(|file| {
                zip::ZipArchive::new(file)
                    .and_then(|mut archive| archive.extract(&staging))
                    .map_err(|e| DeployError::Target(format!("Failed to unpack artifact: {}", e)))
            });

        if let Err(e) = unpacked.and_then(|_| self.swap_in(&staging)) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        tracing::info!(
            "Published {} to {} ({})",
            artifact.name,
            self.target.display(),
            environment
        );

        Ok(self.public_url())
    }
}

/// Put the retired site back after a failed swap and describe what happened.
fn restore(retired: &Path, target: &Path, cause: std::io::Error) -> DeployError {
    match fs::rename(retired, target) {
        Ok(()) => target_error(target)(cause),
        Err(e) => {
            tracing::error!(
                "Previous site could not be restored from {} to {}: {}",
                retired.display(),
                target.display(),
                e
            );
            DeployError::Target(format!(
                "{}: {}; previous site could not be restored from {}: {}",
                target.display(),
                cause,
                retired.display(),
                e
            ))
        }
    }
}

fn target_error(path: &Path) -> impl Fn(std::io::Error) -> DeployError + '_ {
    move |e| DeployError::Target(format!("{}: {}", path.display(), e))
}
