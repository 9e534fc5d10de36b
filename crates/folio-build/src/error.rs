//! Build stage errors.

use folio_env::EnvError;

use crate::builder::BuildStep;

/// Errors that can occur during the build stage.
///
/// Every variant is fatal: the stage stops and no artifact is produced.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Book source not found: {0}")]
    SourceNotFound(String),

    #[error("Version declaration error: {0}")]
    Declaration(#[from] EnvError),

    #[error("Assets directory not found: {0}")]
    AssetsNotFound(String),

    #[error("Failed to provision {tool} {version}: {message}")]
    Provision {
        tool: String,
        version: String,
        message: String,
    },

    #[error("Generator version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Failed to run {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("Generator failed{}:\n{diagnostics}", exit_suffix(.code))]
    Generate {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("Packaging failed: {0}")]
    Package(String),

    #[error("Failed to read {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to write {path}: {message}")]
    WriteError { path: String, message: String },

    #[error("Build interrupted at step '{0}'")]
    Interrupted(BuildStep),
}

/// Coarse classification of build failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Provisioning,
    Generation,
    Packaging,
    Interrupted,
}

impl BuildError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceNotFound(_) | Self::Declaration(_) => ErrorKind::Configuration,
            Self::Provision { .. } | Self::VersionMismatch { .. } => ErrorKind::Provisioning,
            Self::Spawn { .. } | Self::Generate { .. } => ErrorKind::Generation,
            Self::AssetsNotFound(_)
            | Self::Package(_)
            | Self::ReadError { .. }
            | Self::WriteError { .. } => ErrorKind::Packaging,
            Self::Interrupted(_) => ErrorKind::Interrupted,
        }
    }

    pub(crate) fn read(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::ReadError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn write(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::WriteError {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {}", code),
        None => " (terminated by signal)".to_string(),
    }
}
