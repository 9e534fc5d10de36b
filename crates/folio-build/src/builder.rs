//! Build stage orchestration.

use std::fmt;
use std::fs;
use std::future::{self, Future};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Instant;

use folio_env::PinnedVersion;
use walkdir::WalkDir;

use crate::artifact::{discard, package, Artifact, ArtifactMeta};
use crate::assets::{copy_assets, AssetReport};
use crate::error::BuildError;
use crate::generator::Generator;
use crate::provision::Provisioner;
use crate::source::{inspect_source, SourceInfo};

/// Configuration for the build stage.
///
/// Relative paths are resolved against `root`.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Repository root
    pub root: PathBuf,

    /// Book source directory (contains `book.toml`)
    pub book_dir: PathBuf,

    /// Generator output directory
    pub output_dir: PathBuf,

    /// Static assets copied into the output
    pub assets_dir: PathBuf,

    /// Environment declaration file
    pub env_file: PathBuf,

    /// Variable holding the pinned generator version
    pub version_key: String,

    /// Where artifacts and manifests are written
    pub artifact_dir: PathBuf,

    /// Artifact name
    pub artifact_name: String,

    /// Parent of the per-run workspaces used by pipeline runs
    pub runs_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            book_dir: PathBuf::from("."),
            output_dir: PathBuf::from("book"),
            assets_dir: PathBuf::from("assets"),
            env_file: PathBuf::from(".env"),
            version_key: "MDBOOK_VERSION".to_string(),
            artifact_dir: PathBuf::from(".folio/artifacts"),
            artifact_name: "github-pages".to_string(),
            runs_dir: PathBuf::from(".folio/runs"),
        }
    }
}

impl BuildConfig {
    /// Resolve a configured path against the root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// The configured output and artifact directories.
    pub fn workspace(&self) -> Workspace {
        Workspace {
            output_dir: self.resolve(&self.output_dir),
            artifact_dir: self.resolve(&self.artifact_dir),
        }
    }

    /// Directory holding everything one run writes.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.resolve(&self.runs_dir).join(run_id)
    }

    /// A workspace private to one run, so overlapping runs of the same
    /// checkout never write into each other's output.
    pub fn run_workspace(&self, run_id: &str) -> Workspace {
        let dir = self.run_dir(run_id);
        Workspace {
            output_dir: dir.join("book"),
            artifact_dir: dir.join("artifacts"),
        }
    }
}

/// Where a build writes its rendered site and artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub output_dir: PathBuf,
    pub artifact_dir: PathBuf,
}

/// Steps of the build stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStep {
    InspectSource,
    ResolveVersion,
    Provision,
    Generate,
    CopyAssets,
    Package,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InspectSource => "inspect source",
            Self::ResolveVersion => "resolve version",
            Self::Provision => "provision",
            Self::Generate => "generate",
            Self::CopyAssets => "copy assets",
            Self::Package => "package",
        };
        f.write_str(name)
    }
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildResult {
    /// The packaged artifact
    pub artifact: Artifact,

    /// Version the generator ran at
    pub pinned: PinnedVersion,

    /// Checkout details
    pub source: SourceInfo,

    /// Asset overlay outcome
    pub assets: AssetReport,

    /// Number of HTML pages the generator produced
    pub pages: usize,

    /// Total build time in milliseconds
    pub duration_ms: u64,
}

/// The build stage: version resolution through packaging.
pub struct BuildStage {
    config: BuildConfig,
    provisioner: Box<dyn Provisioner>,
    generator: Box<dyn Generator>,
}

impl BuildStage {
    /// Create a build stage.
    pub fn new(
        config: BuildConfig,
        provisioner: impl Provisioner + 'static,
        generator: impl Generator + 'static,
    ) -> Self {
        Self {
            config,
            provisioner: Box::new(provisioner),
            generator: Box::new(generator),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Run every step to completion in the configured workspace.
    pub async fn run(&self) -> Result<BuildResult, BuildError> {
        self.run_with(|_| Ok(())).await
    }

    /// Run every step in the configured workspace, consulting `checkpoint`
    /// before each one.
    pub async fn run_with<F>(&self, checkpoint: F) -> Result<BuildResult, BuildError>
    where
        F: FnMut(BuildStep) -> Result<(), BuildError> + Send,
    {
        self.run_in(&self.config.workspace(), checkpoint, future::pending())
            .await
    }

    /// Run every step in `workspace`.
    ///
    /// `checkpoint` is consulted before each step; an error stops the build
    /// there. Provisioning and generation also stop as soon as `interrupted`
    /// resolves, dropping the in-flight tool process. Any failure leaves no
    /// artifact behind, including one left by an earlier build.
    pub async fn run_in<F, I>(
        &self,
        workspace: &Workspace,
        mut checkpoint: F,
        interrupted: I,
    ) -> Result<BuildResult, BuildError>
    where
        F: FnMut(BuildStep) -> Result<(), BuildError> + Send,
        I: Future<Output = ()> + Send,
    {
        let name = &self.config.artifact_name;
        discard(&workspace.artifact_dir, name)?;

        tokio::pin!(interrupted);
        let result = self.steps(workspace, &mut checkpoint, interrupted).await;
        if result.is_err() {
            if let Err(e) = discard(&workspace.artifact_dir, name) {
                tracing::warn!("Failed to remove partial artifact: {}", e);
            }
        }
        result
    }

    async fn steps<F, I>(
        &self,
        workspace: &Workspace,
        checkpoint: &mut F,
        mut interrupted: Pin<&mut I>,
    ) -> Result<BuildResult, BuildError>
    where
        F: FnMut(BuildStep) -> Result<(), BuildError> + Send,
        I: Future<Output = ()> + Send,
    {
        let start = Instant::now();
        let config = &self.config;

        checkpoint(BuildStep::InspectSource)?;
        let book_dir = config.resolve(&config.book_dir);
        let source = inspect_source(&config.root, &book_dir).await?;

        checkpoint(BuildStep::ResolveVersion)?;
        let pinned = PinnedVersion::resolve(&config.resolve(&config.env_file), &config.version_key)?;
        tracing::info!("Resolved {} from {}", pinned, pinned.source.display());

        // Configuration problems surface before any download starts.
        let assets_dir = config.resolve(&config.assets_dir);
        if !assets_dir.is_dir() {
            return Err(BuildError::AssetsNotFound(assets_dir.display().to_string()));
        }

        checkpoint(BuildStep::Provision)?;
        let tool = tokio::select! {
            tool = self.provisioner.provision(&pinned) => tool?,
            _ = interrupted.as_mut() => return Err(BuildError::Interrupted(BuildStep::Provision)),
        };

        checkpoint(BuildStep::Generate)?;
        let output_dir = &workspace.output_dir;
        self.reset_output(output_dir, &source)?;
        tokio::select! {
            generated = self.generator.generate(&tool, &book_dir, output_dir) => generated?,
            _ = interrupted.as_mut() => return Err(BuildError::Interrupted(BuildStep::Generate)),
        }
        let pages = count_pages(output_dir);
        tracing::info!("{} rendered {} pages", self.generator.name(), pages);

        checkpoint(BuildStep::CopyAssets)?;
        let assets = copy_assets(&assets_dir, output_dir)?;

        checkpoint(BuildStep::Package)?;
        let artifact = package(
            output_dir,
            &workspace.artifact_dir,
            &config.artifact_name,
            ArtifactMeta {
                tool_version: tool.version.to_string(),
                commit: source.commit.clone(),
            },
        )?;

        Ok(BuildResult {
            artifact,
            pinned,
            source,
            assets,
            pages,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Start from an empty output directory so no stale page is published.
    fn reset_output(&self, output_dir: &Path, source: &SourceInfo) -> Result<(), BuildError> {
        if source.root.starts_with(output_dir) || source.book_dir.starts_with(output_dir) {
            return Err(BuildError::Package(format!(
                "Output directory {} contains the sources",
                output_dir.display()
            )));
        }

        if output_dir.exists() {
            fs::remove_dir_all(output_dir).map_err(|e| BuildError::write(output_dir, e))?;
        }
        fs::create_dir_all(output_dir).map_err(|e| BuildError::write(output_dir, e))
    }
}

fn count_pages(output_dir: &Path) -> usize {
    WalkDir::new(output_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("html"))
        .count()
}
