//! Trigger events and what they are allowed to do.

use std::fmt;

/// The event that starts a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A push to a branch
    Push { branch: String },

    /// Any pull request activity
    PullRequest { number: u64 },
}

/// Stages a trigger runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPlan {
    /// Build, then publish
    BuildAndDeploy,

    /// Build only; pull requests carry no publish permission
    BuildOnly,
}

impl Trigger {
    pub fn push(branch: impl Into<String>) -> Self {
        Self::Push {
            branch: branch.into(),
        }
    }

    pub fn pull_request(number: u64) -> Self {
        Self::PullRequest { number }
    }

    /// Decide what this trigger runs. `None` means no run at all.
    pub fn plan(&self, deploy_branch: &str) -> Option<RunPlan> {
        match self {
            Self::Push { branch } if short_branch(branch) == short_branch(deploy_branch) => {
                Some(RunPlan::BuildAndDeploy)
            }
            Self::Push { .. } => None,
            Self::PullRequest { .. } => Some(RunPlan::BuildOnly),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push { branch } => write!(f, "push to {}", short_branch(branch)),
            Self::PullRequest { number } => write!(f, "pull request #{}", number),
        }
    }
}

/// `refs/heads/main` and `main` name the same branch.
fn short_branch(branch: &str) -> &str {
    branch.strip_prefix("refs/heads/").unwrap_or(branch)
}
