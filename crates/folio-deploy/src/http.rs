//! Publishing over HTTP to a hosting API.

use async_trait::async_trait;
use folio_build::Artifact;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::error::DeployError;
use crate::platform::HostingPlatform;
use crate::token::IdToken;

/// Hosting platform reached through an HTTP deployment endpoint.
///
/// `POST {endpoint}/deployments?environment=..&artifact=..` with the archive as
/// the body and the identity token as bearer. A successful response carries
/// `{"page_url": "..."}`.
#[derive(Debug, Clone)]
pub struct HttpPlatform {
    client: reqwest::Client,
    endpoint: Url,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    page_url: String,
}

impl HttpPlatform {
    /// Create a platform client for `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self, DeployError> {
        if endpoint.trim().is_empty() {
            return Err(DeployError::Config(
                "deploy.endpoint is required for the http platform".to_string(),
            ));
        }

        let endpoint = Url::parse(endpoint)
            .map_err(|e| DeployError::Config(format!("Invalid endpoint {}: {}", endpoint, e)))?;

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    fn deployments_url(&self, environment: &str, artifact: &str) -> Result<Url, DeployError> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}/deployments", base))
            .map_err(|e| DeployError::Config(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("environment", environment)
            .append_pair("artifact", artifact);
        Ok(url)
    }
}

#[async_trait]
impl HostingPlatform for HttpPlatform {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn publish(
        &self,
        artifact: &Artifact,
        environment: &str,
        token: &IdToken,
    ) -> Result<String, DeployError> {
        let url = self.deployments_url(environment, &artifact.name)?;
        let body = artifact.read_archive()?;

        tracing::info!("Uploading {} bytes to {}", body.len(), self.endpoint);

        let response = self
            .client
            .post(url)
            .bearer_auth(token.secret())
            .header(CONTENT_TYPE, "application/zip")
            .header("X-Artifact-Digest", format!("sha256:{}", artifact.digest))
            .body(body)
            .send()
            .await
            .map_err(|e| DeployError::Transfer {
                status: None,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = response.text().await.unwrap_or_default();
            return Err(DeployError::Unauthorized {
                environment: environment.to_string(),
                message: message.trim().to_string(),
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DeployError::Transfer {
                status: Some(status.as_u16()),
                message: message.trim().to_string(),
            });
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| DeployError::Response(e.to_string()))?;

        Ok(parsed.page_url)
    }
}
