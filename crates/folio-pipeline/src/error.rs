//! Pipeline errors.

use folio_build::BuildError;
use folio_deploy::DeployError;

use crate::state::RunState;

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("Deploy failed: {0}")]
    Deploy(#[from] DeployError),

    #[error("Run superseded by a newer run in group '{group}' at {step}")]
    Superseded { group: String, step: String },

    #[error("Invalid run state transition: {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("Group marker error: {0}")]
    Marker(String),

    #[error("Failed to take publish lock: {0}")]
    PublishLock(String),
}

impl PipelineError {
    /// The terminal state a run ends in when it fails with this error.
    pub fn terminal_state(&self) -> RunState {
        match self {
            Self::Build(_) | Self::Marker(_) => RunState::BuildFailed,
            Self::Deploy(_) | Self::PublishLock(_) => RunState::DeployFailed,
            Self::Superseded { .. } => RunState::Superseded,
            Self::InvalidTransition { from, .. } => *from,
        }
    }
}
