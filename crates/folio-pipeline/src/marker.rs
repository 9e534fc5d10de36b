//! Cross-process group claims.
//!
//! Each concurrency group has a marker file naming the run that most recently
//! entered it. A run that finds another id in the marker has been superseded.
//! Publishing is serialised by an exclusive lock on a sibling `<group>.lock`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use tokio::task::JoinHandle;

use crate::cancel::CancelToken;
use crate::error::PipelineError;

/// A run's claim on a concurrency group, backed by a file.
#[derive(Debug, Clone)]
pub struct GroupMarker {
    path: PathBuf,
    lock_path: PathBuf,
    run_id: String,
}

impl GroupMarker {
    /// Claim `group` for `run_id`, superseding whichever run held it.
    pub fn claim(state_dir: &Path, group: &str, run_id: &str) -> Result<Self, PipelineError> {
        let dir = state_dir.join("groups");
        fs::create_dir_all(&dir).map_err(|e| marker_error(&dir, e))?;

        let path = dir.join(group);
        let staged = dir.join(format!(".{}.{}", group, run_id));
        fs::write(&staged, run_id).map_err(|e| marker_error(&staged, e))?;
        fs::rename(&staged, &path).map_err(|e| marker_error(&path, e))?;

        tracing::debug!("Run {} claimed group marker {}", run_id, path.display());

        Ok(Self {
            path,
            lock_path: dir.join(format!("{}.lock", group)),
            run_id: run_id.to_string(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run id currently recorded in the marker.
    pub fn holder(&self) -> Option<String> {
        read_holder(&self.path)
    }

    /// Whether this run still holds the group.
    ///
    /// A missing marker means nobody newer has claimed the group.
    pub fn is_current(&self) -> bool {
        is_current(&self.path, &self.run_id)
    }

    /// Take the group's publish lock, waiting for any other process that
    /// holds it.
    ///
    /// The lock is held until the returned guard is dropped.
    pub async fn lock_publish(&self) -> Result<PublishLock, PipelineError> {
        let path = self.lock_path.clone();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| lock_error(&path, e))?;

        let file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|()| file))
            .await
            .map_err(|e| lock_error(&path, e))?
            .map_err(|e| lock_error(&path, e))?;

        tracing::debug!("Run {} holds publish lock {}", self.run_id, path.display());
        Ok(PublishLock { file, path })
    }

    /// Poll the marker and cancel `token` once another run claims the group.
    ///
    /// The task ends when the token is cancelled by anyone.
    pub fn watch(&self, token: CancelToken, interval: Duration) -> JoinHandle<()> {
        let path = self.path.clone();
        let run_id = self.run_id.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if !is_current(&path, &run_id) {
                            tracing::info!("Run {} superseded via {}", run_id, path.display());
                            token.cancel();
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Remove the marker if this run still holds it.
    pub fn release(&self) {
        if self.is_current() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Exclusive hold on a group's publish slot, shared across processes.
#[derive(Debug)]
pub struct PublishLock {
    file: File,
    path: PathBuf,
}

impl Drop for PublishLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

fn read_holder(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn is_current(path: &Path, run_id: &str) -> bool {
    match read_holder(path) {
        Some(holder) => holder == run_id,
        None => true,
    }
}

fn marker_error(path: &Path, err: std::io::Error) -> PipelineError {
    PipelineError::Marker(format!("{}: {}", path.display(), err))
}

fn lock_error(path: &Path, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::PublishLock(format!("{}: {}", path.display(), err))
}
