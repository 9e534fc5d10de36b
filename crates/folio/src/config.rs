//! `folio.toml` loading and stage construction.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use folio_build::{BuildConfig, BuildStage, CargoProvisioner, MdBook, PathProvisioner};
use folio_deploy::{
    DeployConfig, Deployer, DirectoryPlatform, EnvOidcTokenSource, HostingPlatform, HttpPlatform,
    StaticTokenSource,
};
use folio_pipeline::PipelineConfig;
use serde::Deserialize;

/// Configuration file structure (folio.toml).
#[derive(Debug, Default, Deserialize)]
pub struct FolioConfig {
    #[serde(default)]
    pub book: BookSection,
    #[serde(default)]
    pub generator: GeneratorSection,
    #[serde(default)]
    pub artifact: ArtifactSection,
    #[serde(default)]
    pub deploy: DeploySection,
}

#[derive(Debug, Deserialize)]
pub struct BookSection {
    #[serde(default = "default_src")]
    pub src: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_assets")]
    pub assets: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct GeneratorSection {
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
    #[serde(default = "default_version_key")]
    pub version_key: String,
    /// Install the pinned version with cargo; otherwise verify `binary`
    #[serde(default = "default_install")]
    pub install: bool,
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    #[serde(default = "default_tools_dir")]
    pub tools_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactSection {
    #[serde(default = "default_artifact_name")]
    pub name: String,
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
    /// Per-run workspaces for `folio run`
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Http,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Oidc,
    Static,
}

#[derive(Debug, Deserialize)]
pub struct DeploySection {
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_platform")]
    pub platform: PlatformKind,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_target")]
    pub target: PathBuf,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_token")]
    pub token: TokenKind,
    #[serde(default = "default_token_request_url_env")]
    pub token_request_url_env: String,
    #[serde(default = "default_token_request_token_env")]
    pub token_request_token_env: String,
    #[serde(default = "default_static_token_env")]
    pub static_token_env: String,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_marker_poll_ms")]
    pub marker_poll_ms: u64,
}

fn default_src() -> PathBuf {
    PathBuf::from(".")
}
fn default_output() -> PathBuf {
    PathBuf::from("book")
}
fn default_assets() -> PathBuf {
    PathBuf::from("assets")
}
fn default_env_file() -> PathBuf {
    PathBuf::from(".env")
}
fn default_version_key() -> String {
    "MDBOOK_VERSION".to_string()
}
fn default_install() -> bool {
    true
}
fn default_binary() -> PathBuf {
    PathBuf::from("mdbook")
}
fn default_tools_dir() -> PathBuf {
    PathBuf::from(".folio/tools")
}
fn default_artifact_name() -> String {
    "github-pages".to_string()
}
fn default_artifact_dir() -> PathBuf {
    PathBuf::from(".folio/artifacts")
}
fn default_runs_dir() -> PathBuf {
    PathBuf::from(".folio/runs")
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_group() -> String {
    "pages".to_string()
}
fn default_environment() -> String {
    "github-pages".to_string()
}
fn default_platform() -> PlatformKind {
    PlatformKind::Http
}
fn default_target() -> PathBuf {
    PathBuf::from("public")
}
fn default_audience() -> String {
    "folio-pages".to_string()
}
fn default_token() -> TokenKind {
    TokenKind::Oidc
}
fn default_token_request_url_env() -> String {
    "ACTIONS_ID_TOKEN_REQUEST_URL".to_string()
}
fn default_token_request_token_env() -> String {
    "ACTIONS_ID_TOKEN_REQUEST_TOKEN".to_string()
}
fn default_static_token_env() -> String {
    "FOLIO_DEPLOY_TOKEN".to_string()
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(".folio/state")
}
fn default_marker_poll_ms() -> u64 {
    500
}

impl Default for BookSection {
    fn default() -> Self {
        Self {
            src: default_src(),
            output: default_output(),
            assets: default_assets(),
        }
    }
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            env_file: default_env_file(),
            version_key: default_version_key(),
            install: default_install(),
            binary: default_binary(),
            tools_dir: default_tools_dir(),
        }
    }
}

impl Default for ArtifactSection {
    fn default() -> Self {
        Self {
            name: default_artifact_name(),
            dir: default_artifact_dir(),
            runs_dir: default_runs_dir(),
        }
    }
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            group: default_group(),
            environment: default_environment(),
            platform: default_platform(),
            endpoint: String::new(),
            target: default_target(),
            base_url: String::new(),
            audience: default_audience(),
            token: default_token(),
            token_request_url_env: default_token_request_url_env(),
            token_request_token_env: default_token_request_token_env(),
            static_token_env: default_static_token_env(),
            state_dir: default_state_dir(),
            marker_poll_ms: default_marker_poll_ms(),
        }
    }
}

impl FolioConfig {
    /// Load configuration from `path` if it exists.
    /// Returns an error if the file exists but is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: FolioConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn build_config(&self, root: &Path, output: Option<PathBuf>) -> BuildConfig {
        BuildConfig {
            root: root.to_path_buf(),
            book_dir: self.book.src.clone(),
            output_dir: output.unwrap_or_else(|| self.book.output.clone()),
            assets_dir: self.book.assets.clone(),
            env_file: self.generator.env_file.clone(),
            version_key: self.generator.version_key.clone(),
            artifact_dir: self.artifact.dir.clone(),
            artifact_name: self.artifact.name.clone(),
            runs_dir: self.artifact.runs_dir.clone(),
        }
    }

    /// Build stage for the repository at `root`.
    pub fn build_stage(&self, root: &Path, output: Option<PathBuf>) -> BuildStage {
        let config = self.build_config(root, output);
        if self.generator.install {
            let tools_dir = config.resolve(&self.generator.tools_dir);
            BuildStage::new(config, CargoProvisioner::new("mdbook", tools_dir), MdBook::new())
        } else {
            let binary = self.generator.binary.clone();
            BuildStage::new(config, PathProvisioner::new("mdbook", binary), MdBook::new())
        }
    }

    /// Deployer for the configured platform and token source.
    pub fn deployer(&self, root: &Path) -> Result<Deployer> {
        let deploy = &self.deploy;
        match deploy.platform {
            PlatformKind::Http => {
                let platform = HttpPlatform::new(&deploy.endpoint)
                    .context("Invalid [deploy] configuration for the http platform")?;
                self.with_tokens(platform)
            }
            PlatformKind::Directory => {
                let target = if deploy.target.is_absolute() {
                    deploy.target.clone()
                } else {
                    root.join(&deploy.target)
                };
                let platform = DirectoryPlatform::new(target, deploy.audience.as_str())
                    .with_base_url(deploy.base_url.as_str());
                self.with_tokens(platform)
            }
        }
    }

    fn with_tokens(&self, platform: impl HostingPlatform + 'static) -> Result<Deployer> {
        let deploy = &self.deploy;
        let config = DeployConfig {
            environment: deploy.environment.clone(),
            audience: deploy.audience.clone(),
        };

        match deploy.token {
            TokenKind::Oidc => {
                let tokens = EnvOidcTokenSource::new(
                    deploy.token_request_url_env.as_str(),
                    deploy.token_request_token_env.as_str(),
                );
                Ok(Deployer::new(config, platform, tokens))
            }
            TokenKind::Static => {
                let secret = std::env::var(&deploy.static_token_env).unwrap_or_else(|_| {
                    tracing::debug!("{} not set, using a local token", deploy.static_token_env);
                    "local".to_string()
                });
                Ok(Deployer::new(config, platform, StaticTokenSource::new(secret)))
            }
        }
    }

    pub fn pipeline_config(&self, root: &Path) -> PipelineConfig {
        let state_dir = if self.deploy.state_dir.is_absolute() {
            self.deploy.state_dir.clone()
        } else {
            root.join(&self.deploy.state_dir)
        };

        PipelineConfig {
            deploy_branch: self.deploy.branch.clone(),
            group: self.deploy.group.clone(),
            state_dir: Some(state_dir),
            marker_poll: Duration::from_millis(self.deploy.marker_poll_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_uses_defaults() {
        let temp = tempdir().unwrap();

        let config = FolioConfig::load(&temp.path().join("folio.toml")).unwrap();

        assert_eq!(config.book.output, PathBuf::from("book"));
        assert_eq!(config.generator.version_key, "MDBOOK_VERSION");
        assert_eq!(config.artifact.name, "github-pages");
        assert_eq!(config.deploy.platform, PlatformKind::Http);
        assert_eq!(config.deploy.token, TokenKind::Oidc);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("folio.toml");
        fs::write(
            &path,
            "[deploy]\nplatform = \"directory\"\nbranch = \"trunk\"\n\n[book]\noutput = \"site\"\n",
        )
        .unwrap();

        let config = FolioConfig::load(&path).unwrap();

        assert_eq!(config.deploy.platform, PlatformKind::Directory);
        assert_eq!(config.deploy.branch, "trunk");
        assert_eq!(config.deploy.group, "pages");
        assert_eq!(config.book.output, PathBuf::from("site"));
        assert_eq!(config.book.assets, PathBuf::from("assets"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("folio.toml");
        fs::write(&path, "[deploy]\nplatform = \"ftp\"\n").unwrap();

        assert!(FolioConfig::load(&path).is_err());
    }

    #[test]
    fn build_config_applies_output_override() {
        let config = FolioConfig::default();

        let build = config.build_config(Path::new("/repo"), Some(PathBuf::from("out")));

        assert_eq!(build.root, PathBuf::from("/repo"));
        assert_eq!(build.output_dir, PathBuf::from("out"));
        assert_eq!(build.artifact_dir, PathBuf::from(".folio/artifacts"));
        assert_eq!(
            build.run_workspace("r1").output_dir,
            PathBuf::from("/repo/.folio/runs/r1/book")
        );
    }

    #[test]
    fn http_platform_requires_endpoint() {
        let config = FolioConfig::default();

        assert!(config.deployer(Path::new(".")).is_err());
    }

    #[test]
    fn directory_platform_with_static_token() {
        let mut config = FolioConfig::default();
        config.deploy.platform = PlatformKind::Directory;
        config.deploy.token = TokenKind::Static;

        let deployer = config.deployer(Path::new("/repo")).unwrap();

        assert_eq!(deployer.config().environment, "github-pages");
        assert_eq!(deployer.config().audience, "folio-pages");
    }

    #[test]
    fn pipeline_state_dir_is_under_root() {
        let config = FolioConfig::default();

        let pipeline = config.pipeline_config(Path::new("/repo"));

        assert_eq!(pipeline.state_dir, Some(PathBuf::from("/repo/.folio/state")));
        assert_eq!(pipeline.deploy_branch, "main");
    }
}
