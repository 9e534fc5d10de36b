//! Documentation generator invocation.

use std::ffi::OsStr;
use std::path::Path;

use async_trait::async_trait;

use crate::command::{capture, error_text};
use crate::error::BuildError;
use crate::provision::ProvisionedTool;

/// A documentation generator treated as a black box.
///
/// Given a source tree and an output directory it either fills the output
/// directory with static files or fails with its own diagnostics.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generator identifier (e.g. "mdbook")
    fn name(&self) -> &'static str;

    /// Render `source` into `output` using the provisioned tool.
    async fn generate(
        &self,
        tool: &ProvisionedTool,
        source: &Path,
        output: &Path,
    ) -> Result<(), BuildError>;
}

/// The mdBook generator (`mdbook build`).
#[derive(Debug, Clone, Copy, Default)]
pub struct MdBook;

impl MdBook {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Generator for MdBook {
    fn name(&self) -> &'static str {
        "mdbook"
    }

    async fn generate(
        &self,
        tool: &ProvisionedTool,
        source: &Path,
        output: &Path,
    ) -> Result<(), BuildError> {
        tracing::info!(
            "Rendering {} with {} {}",
            source.display(),
            tool.name,
            tool.version
        );

        let args = [
            OsStr::new("build"),
            source.as_os_str(),
            OsStr::new("--dest-dir"),
            output.as_os_str(),
        ];
        let result = capture(&tool.binary, args, None).await?;

        if !result.status.success() {
            return Err(BuildError::Generate {
                code: result.status.code(),
                diagnostics: error_text(&result),
            });
        }

        // mdbook reports progress on stderr even when it succeeds.
        for line in String::from_utf8_lossy(&result.stderr).lines() {
            tracing::debug!("{}: {}", tool.name, line);
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use semver::Version;
    use tempfile::tempdir;

    fn script_tool(dir: &Path, body: &str) -> ProvisionedTool {
        let binary = dir.join("mdbook");
        std::fs::write(&binary, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        ProvisionedTool {
            name: "mdbook".into(),
            binary,
            version: Version::new(0, 4, 25),
        }
    }

    #[tokio::test]
    async fn passes_source_and_dest_dir() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("book");
        let output = temp.path().join("out");
        std::fs::create_dir_all(&source).unwrap();
        // $2 is the source, $4 the destination
        let tool = script_tool(
            temp.path(),
            "mkdir -p \"$4\" && echo \"<h1>$1</h1>\" > \"$4/index.html\"",
        );

        MdBook::new().generate(&tool, &source, &output).await.unwrap();

        let html = std::fs::read_to_string(output.join("index.html")).unwrap();
        assert_eq!(html.trim(), "<h1>build</h1>");
    }

    #[tokio::test]
    async fn surfaces_generator_diagnostics() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("book");
        std::fs::create_dir_all(&source).unwrap();
        let tool = script_tool(
            temp.path(),
            "echo 'ERROR Invalid configuration file' >&2; exit 101",
        );

        let err = MdBook::new()
            .generate(&tool, &source, &PathBuf::from("out"))
            .await
            .unwrap_err();

        match err {
            BuildError::Generate { code, diagnostics } => {
                assert_eq!(code, Some(101));
                assert_eq!(diagnostics, "ERROR Invalid configuration file");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
