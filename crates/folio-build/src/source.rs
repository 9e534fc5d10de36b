//! Source checkout inspection.

use std::path::{Path, PathBuf};

use crate::command::{capture, stdout_text};
use crate::error::BuildError;

/// What the build knows about the checked-out sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Repository root
    pub root: PathBuf,

    /// Book source directory (contains `book.toml`)
    pub book_dir: PathBuf,

    /// Commit at HEAD, when the root is a git checkout
    pub commit: Option<String>,

    /// Whether the checkout has truncated history
    pub shallow: bool,
}

/// Inspect the checkout the build runs against.
///
/// The book directory must exist. Git metadata is optional: a plain
/// directory builds fine, but a shallow clone is reported because the
/// generator derives page metadata from history.
pub async fn inspect_source(root: &Path, book_dir: &Path) -> Result<SourceInfo, BuildError> {
    if !book_dir.is_dir() {
        return Err(BuildError::SourceNotFound(book_dir.display().to_string()));
    }

    let commit = git(root, &["rev-parse", "HEAD"]).await;
    let shallow = match commit {
        Some(_) => git(root, &["rev-parse", "--is-shallow-repository"])
            .await
            .is_some_and(|out| out == "true"),
        None => false,
    };

    match &commit {
        Some(sha) if shallow => {
            tracing::warn!("Checkout at {} is shallow; page history may be incomplete", sha)
        }
        Some(sha) => tracing::info!("Building from commit {}", sha),
        None => tracing::info!("{} is not a git checkout", root.display()),
    }

    Ok(SourceInfo {
        root: root.to_path_buf(),
        book_dir: book_dir.to_path_buf(),
        commit,
        shallow,
    })
}

/// Run a git query, returning `None` when git is unavailable or fails.
async fn git(root: &Path, args: &[&str]) -> Option<String> {
    let mut full_args = vec!["-C".to_string(), root.display().to_string()];
    full_args.extend(args.iter().map(|a| a.to_string()));

    let output = capture(Path::new("git"), &full_args, None).await.ok()?;
    if !output.status.success() {
        return None;
    }

    let text = stdout_text(&output);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_book_dir_is_an_error() {
        let temp = tempdir().unwrap();

        let err = inspect_source(temp.path(), &temp.path().join("book-src"))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn plain_directory_has_no_commit() {
        let temp = tempdir().unwrap();
        let book = temp.path().join("src");
        fs::create_dir_all(&book).unwrap();

        let info = inspect_source(temp.path(), &book).await.unwrap();

        assert_eq!(info.book_dir, book);
        assert_eq!(info.commit, None);
        assert!(!info.shallow);
    }
}
