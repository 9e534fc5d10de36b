//! Run state machine.

use std::fmt;

use crate::error::PipelineError;

/// State of a pipeline run.
///
/// ```text
/// Idle -> Building -> BuildFailed
///                  -> Built -> Deploying -> DeployFailed
///                                        -> Deployed
///                           -> Finished            (build-only runs)
/// Idle | Building | Built -> Superseded
/// ```
///
/// There is no retry edge: a failed run stays failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Building,
    BuildFailed,
    Built,
    Deploying,
    DeployFailed,
    Deployed,
    Finished,
    Superseded,
}

impl RunState {
    /// Whether `next` may follow this state.
    pub fn can_transition(self, next: RunState) -> bool {
        use RunState::*;

        matches!(
            (self, next),
            (Idle, Building)
                | (Idle, Superseded)
                | (Building, BuildFailed)
                | (Building, Built)
                | (Building, Superseded)
                | (Built, Deploying)
                | (Built, Finished)
                | (Built, Superseded)
                | (Deploying, DeployFailed)
                | (Deploying, Deployed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::BuildFailed | Self::DeployFailed | Self::Deployed | Self::Finished | Self::Superseded
        )
    }

    /// Whether a run ending in this state succeeded.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Deployed | Self::Finished)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::BuildFailed => "build failed",
            Self::Built => "built",
            Self::Deploying => "deploying",
            Self::DeployFailed => "deploy failed",
            Self::Deployed => "deployed",
            Self::Finished => "finished",
            Self::Superseded => "superseded",
        };
        f.write_str(name)
    }
}

/// Tracks a run through its states, rejecting illegal transitions.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    history: Vec<RunState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            history: vec![RunState::Idle],
        }
    }

    pub fn current(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Idle)
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    /// Move to `next`.
    pub fn advance(&mut self, next: RunState) -> Result<(), PipelineError> {
        let current = self.current();
        if !current.can_transition(next) {
            return Err(PipelineError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        tracing::debug!("Run state {} -> {}", current, next);
        self.history.push(next);
        Ok(())
    }
}
