//! Generator provisioning at an exact pinned version.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use folio_env::PinnedVersion;
use semver::Version;

use crate::command::{capture, error_text, stdout_text};
use crate::error::BuildError;

/// A generator binary verified to run at the pinned version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedTool {
    /// Tool name (e.g. "mdbook")
    pub name: String,

    /// Path to the executable
    pub binary: PathBuf,

    /// Version the binary reported
    pub version: Version,
}

/// Makes a generator available at exactly the requested version.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Tool this provisioner manages
    fn tool(&self) -> &str;

    /// Provision the tool at `pinned`, or fail. Never substitutes another version.
    async fn provision(&self, pinned: &PinnedVersion) -> Result<ProvisionedTool, BuildError>;
}

/// Installs the generator with `cargo install` into a private tools root.
#[derive(Debug, Clone)]
pub struct CargoProvisioner {
    tool: String,
    tools_dir: PathBuf,
    cargo: PathBuf,
}

impl CargoProvisioner {
    /// Create a provisioner installing `tool` under `tools_dir`.
    pub fn new(tool: impl Into<String>, tools_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            tools_dir: tools_dir.into(),
            cargo: PathBuf::from("cargo"),
        }
    }

    /// Use a specific cargo executable.
    pub fn with_cargo(mut self, cargo: impl Into<PathBuf>) -> Self {
        self.cargo = cargo.into();
        self
    }

    /// Where the installed binary lives.
    pub fn binary_path(&self) -> PathBuf {
        self.tools_dir.join("bin").join(exe_name(&self.tool))
    }
}

#[async_trait]
impl Provisioner for CargoProvisioner {
    fn tool(&self) -> &str {
        &self.tool
    }

    async fn provision(&self, pinned: &PinnedVersion) -> Result<ProvisionedTool, BuildError> {
        let binary = self.binary_path();

        match probe_version(&binary).await {
            Some(found) if found == pinned.version => {
                tracing::info!("{} {} already provisioned", self.tool, found);
                return Ok(ProvisionedTool {
                    name: self.tool.clone(),
                    binary,
                    version: found,
                });
            }
            Some(found) => {
                tracing::info!("Replacing {} {} with {}", self.tool, found, pinned.version)
            }
            None => tracing::info!("Installing {} {}", self.tool, pinned.version),
        }

        let version_req = format!("={}", pinned.version);
        let args: [&OsStr; 8] = [
            OsStr::new("install"),
            OsStr::new(&self.tool),
            OsStr::new("--version"),
            OsStr::new(&version_req),
            OsStr::new("--locked"),
            OsStr::new("--force"),
            OsStr::new("--root"),
            self.tools_dir.as_os_str(),
        ];

        let output = capture(&self.cargo, args, None).await?;
        if !output.status.success() {
            return Err(BuildError::Provision {
                tool: self.tool.clone(),
                version: pinned.version_string(),
                message: error_text(&output),
            });
        }

        verify(&self.tool, &binary, pinned).await
    }
}

/// Uses an already installed generator, failing unless it matches exactly.
#[derive(Debug, Clone)]
pub struct PathProvisioner {
    tool: String,
    binary: PathBuf,
}

impl PathProvisioner {
    /// Use `binary` (a path, or a name looked up on `PATH`).
    pub fn new(tool: impl Into<String>, binary: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Provisioner for PathProvisioner {
    fn tool(&self) -> &str {
        &self.tool
    }

    async fn provision(&self, pinned: &PinnedVersion) -> Result<ProvisionedTool, BuildError> {
        verify(&self.tool, &self.binary, pinned).await
    }
}

async fn verify(
    tool: &str,
    binary: &Path,
    pinned: &PinnedVersion,
) -> Result<ProvisionedTool, BuildError> {
    let found = probe_version(binary)
        .await
        .ok_or_else(|| BuildError::Provision {
            tool: tool.to_string(),
            version: pinned.version_string(),
            message: format!("{} did not report a version", binary.display()),
        })?;

    if found != pinned.version {
        return Err(BuildError::VersionMismatch {
            expected: pinned.version_string(),
            found: found.to_string(),
        });
    }

    Ok(ProvisionedTool {
        name: tool.to_string(),
        binary: binary.to_path_buf(),
        version: found,
    })
}

/// Ask a binary for its version.
async fn probe_version(binary: &Path) -> Option<Version> {
    let output = capture(binary, ["--version"], None).await.ok()?;
    if !output.status.success() {
        return None;
    }
    parse_version_output(&stdout_text(&output))
}

/// Parse `--version` output such as `mdbook v0.4.25`.
pub fn parse_version_output(output: &str) -> Option<Version> {
    let token = output.lines().next()?.split_whitespace().last()?;
    let token = token.strip_prefix('v').unwrap_or(token);
    Version::parse(token).ok()
}

fn exe_name(tool: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", tool)
    } else {
        tool.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinned(version: &str) -> PinnedVersion {
        PinnedVersion {
            key: "MDBOOK_VERSION".into(),
            version: Version::parse(version).unwrap(),
            source: PathBuf::from(".env"),
        }
    }

    #[test]
    fn parses_mdbook_version_line() {
        assert_eq!(
            parse_version_output("mdbook v0.4.25\n"),
            Some(Version::new(0, 4, 25))
        );
        assert_eq!(parse_version_output("tool 1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_version_output("no version here"), None);
        assert_eq!(parse_version_output(""), None);
    }

    #[test]
    fn binary_lives_under_tools_root() {
        let provisioner = CargoProvisioner::new("mdbook", "/opt/tools");

        assert!(provisioner.binary_path().starts_with("/opt/tools/bin"));
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, reported: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("mdbook");
        std::fs::write(&path, format!("#!/bin/sh\necho 'mdbook v{}'\n", reported)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn path_provisioner_accepts_exact_version() {
        let temp = tempfile::tempdir().unwrap();
        let binary = fake_tool(temp.path(), "0.4.25");

        let tool = PathProvisioner::new("mdbook", &binary)
            .provision(&pinned("0.4.25"))
            .await
            .unwrap();

        assert_eq!(tool.version, Version::new(0, 4, 25));
        assert_eq!(tool.binary, binary);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn path_provisioner_rejects_other_version() {
        let temp = tempfile::tempdir().unwrap();
        let binary = fake_tool(temp.path(), "0.4.36");

        let err = PathProvisioner::new("mdbook", &binary)
            .provision(&pinned("0.4.25"))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::VersionMismatch { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_a_provisioning_error() {
        let err = PathProvisioner::new("mdbook", "/nonexistent/mdbook")
            .provision(&pinned("0.4.25"))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Provision { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_install_is_a_provisioning_error() {
        let temp = tempfile::tempdir().unwrap();

        let err = CargoProvisioner::new("mdbook", temp.path().join("tools"))
            .with_cargo("false")
            .provision(&pinned("0.4.25"))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Provision { .. }));
    }
}
