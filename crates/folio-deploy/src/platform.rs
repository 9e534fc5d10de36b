//! Hosting platform abstraction.

use async_trait::async_trait;
use folio_build::Artifact;

use crate::error::DeployError;
use crate::token::IdToken;

/// A static hosting target that accepts artifacts.
///
/// Implementations must replace the published site atomically: either the new
/// artifact becomes visible in full, or the previous site stays live.
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    /// Platform identifier (e.g. "http", "directory")
    fn name(&self) -> &'static str;

    /// Publish `artifact` under `environment`, returning the public URL.
    async fn publish(
        &self,
        artifact: &Artifact,
        environment: &str,
        token: &IdToken,
    ) -> Result<String, DeployError>;
}
