//! Deploy stage orchestration.

use std::time::Instant;

use folio_build::Artifact;

use crate::error::DeployError;
use crate::platform::HostingPlatform;
use crate::token::TokenSource;

/// Environment binding for a deploy.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Deployment environment name (e.g. "github-pages")
    pub environment: String,

    /// Audience the identity token is requested for
    pub audience: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            environment: "github-pages".to_string(),
            audience: "folio-pages".to_string(),
        }
    }
}

/// A completed publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// Public URL of the published site
    pub url: String,

    /// Environment the site was published under
    pub environment: String,

    /// Name of the published artifact
    pub artifact: String,

    /// Digest of the published archive
    pub digest: String,

    /// Publish time in milliseconds
    pub duration_ms: u64,
}

/// The deploy stage: verify, authorize, publish.
pub struct Deployer {
    config: DeployConfig,
    platform: Box<dyn HostingPlatform>,
    tokens: Box<dyn TokenSource>,
}

impl Deployer {
    pub fn new(
        config: DeployConfig,
        platform: impl HostingPlatform + 'static,
        tokens: impl TokenSource + 'static,
    ) -> Self {
        Self {
            config,
            platform: Box::new(platform),
            tokens: Box::new(tokens),
        }
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Publish `artifact`.
    ///
    /// The archive is checked against its recorded digest first. The identity
    /// token lives only for this call.
    pub async fn deploy(&self, artifact: &Artifact) -> Result<Deployment, DeployError> {
        let start = Instant::now();

        artifact.verify()?;

        let token = self.tokens.request(&self.config.audience).await?;

        tracing::info!(
            "Publishing {} to {} via {}",
            artifact.name,
            self.config.environment,
            self.platform.name()
        );

        let published = self
            .platform
            .publish(artifact, &self.config.environment, &token)
            .await;
        drop(token);
        let url = published?;

        tracing::info!("Published {}", url);

        Ok(Deployment {
            url,
            environment: self.config.environment.clone(),
            artifact: artifact.name.clone(),
            digest: artifact.digest.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
