//! Deploy stage errors.

use folio_build::BuildError;

/// Errors that can occur while publishing.
///
/// All of them are fatal to the run. Platforms swap content atomically, so
/// the previously published site stays live after any of these.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Artifact error: {0}")]
    Artifact(#[from] BuildError),

    #[error("Identity token unavailable: {0}")]
    Token(String),

    #[error("Not authorized to publish to {environment}: {message}")]
    Unauthorized { environment: String, message: String },

    #[error("Transfer failed{}: {message}", status_suffix(.status))]
    Transfer {
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid platform response: {0}")]
    Response(String),

    #[error("Publish target error: {0}")]
    Target(String),

    #[error("Platform misconfigured: {0}")]
    Config(String),
}

impl DeployError {
    /// Whether the failure was a permission problem rather than a transfer problem.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Token(_) | Self::Unauthorized { .. })
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" (HTTP {})", code))
        .unwrap_or_default()
}
