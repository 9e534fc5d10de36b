//! Short-lived identity tokens for the publish operation.

use std::fmt;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::error::DeployError;

/// An identity token scoped to one audience.
///
/// Held only for the duration of a publish. The secret never appears in
/// `Debug` output or logs.
#[derive(Clone)]
pub struct IdToken {
    value: String,
    audience: String,
}

impl IdToken {
    pub fn new(value: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            audience: audience.into(),
        }
    }

    /// The bearer secret.
    pub fn secret(&self) -> &str {
        &self.value
    }

    /// The audience this token was issued for.
    pub fn audience(&self) -> &str {
        &self.audience
    }
}

impl fmt::Debug for IdToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdToken")
            .field("audience", &self.audience)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Issues identity tokens on request.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Request a fresh token for `audience`.
    async fn request(&self, audience: &str) -> Result<IdToken, DeployError>;
}

/// Requests tokens from an OIDC token endpoint exposed to the CI job.
///
/// The job receives a request URL and a request bearer token through the
/// environment; the issued identity token is bound to the requested audience.
#[derive(Debug, Clone)]
pub struct OidcTokenSource {
    client: reqwest::Client,
    request_url: String,
    request_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    value: String,
}

impl OidcTokenSource {
    pub fn new(request_url: impl Into<String>, request_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            request_url: request_url.into(),
            request_token: request_token.into(),
        }
    }

    /// Read the request URL and bearer from the named environment variables.
    pub fn from_env(url_var: &str, token_var: &str) -> Result<Self, DeployError> {
        let url = std::env::var(url_var).map_err(|_| {
            DeployError::Token(format!(
                "{} is not set; the job lacks the id-token permission",
                url_var
            ))
        })?;
        let token = std::env::var(token_var)
            .map_err(|_| DeployError::Token(format!("{} is not set", token_var)))?;
        Ok(Self::new(url, token))
    }
}

#[async_trait]
impl TokenSource for OidcTokenSource {
    async fn request(&self, audience: &str) -> Result<IdToken, DeployError> {
        let mut url = Url::parse(&self.request_url)
            .map_err(|e| DeployError::Token(format!("Invalid token request URL: {}", e)))?;
        url.query_pairs_mut().append_pair("audience", audience);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.request_token)
            .send()
            .await
            .map_err(|e| DeployError::Token(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeployError::Token(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| DeployError::Token(format!("Malformed token response: {}", e)))?;

        tracing::debug!("Obtained identity token for audience {}", audience);
        Ok(IdToken::new(parsed.value, audience))
    }
}

/// An [`OidcTokenSource`] whose request credentials are read from the
/// environment at request time.
///
/// Lets a run that never publishes start without the id-token permission.
#[derive(Debug, Clone)]
pub struct EnvOidcTokenSource {
    url_var: String,
    token_var: String,
}

impl EnvOidcTokenSource {
    pub fn new(url_var: impl Into<String>, token_var: impl Into<String>) -> Self {
        Self {
            url_var: url_var.into(),
            token_var: token_var.into(),
        }
    }
}

#[async_trait]
impl TokenSource for EnvOidcTokenSource {
    async fn request(&self, audience: &str) -> Result<IdToken, DeployError> {
        OidcTokenSource::from_env(&self.url_var, &self.token_var)?
            .request(audience)
            .await
    }
}

/// Hands out a fixed secret, for local publish targets.
#[derive(Clone)]
pub struct StaticTokenSource {
    value: String,
}

impl StaticTokenSource {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn request(&self, audience: &str) -> Result<IdToken, DeployError> {
        Ok(IdToken::new(self.value.clone(), audience))
    }
}
