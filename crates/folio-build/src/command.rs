//! External process execution with consistent error handling.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Output;

use tokio::process::Command;

use crate::error::BuildError;

/// Run a program to completion and capture its output.
///
/// Only spawn failures are errors here; callers decide what a non-zero exit
/// status means.
pub async fn capture<I, S>(program: &Path, args: I, dir: Option<&Path>) -> Result<Output, BuildError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    if let Some(dir) = dir {
        command.current_dir(dir);
    }

    tracing::debug!("Running {:?}", command.as_std());

    command.output().await.map_err(|e| BuildError::Spawn {
        program: program.display().to_string(),
        message: e.to_string(),
    })
}

/// Extract error text from command output.
///
/// Prefers stderr, falls back to stdout if stderr is empty.
pub fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}

/// Trimmed stdout of a command.
pub fn stdout_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
