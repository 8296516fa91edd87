//! Staging file lifecycle
//!
//! Whoever opens the staging file closes it before returning, on every
//! path. Closing flushes and syncs the data, and a failed close is an
//! error of its own that overrides the outcome of the operation.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::AppError;

/// Staging file opened for writing
pub struct StagingFile {
    path: PathBuf,
    file: File,
}

impl StagingFile {
    /// Create or truncate the file at `path`
    ///
    /// # Errors
    /// Returns `AppError::SnapshotIo` if the file cannot be opened
    pub async fn create(path: &Path) -> Result<Self, AppError> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o644);

        let file = options.open(path).await.map_err(|source| AppError::SnapshotIo {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "Staging file opened for writing");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write handle for streaming into the file
    pub fn writer(&mut self) -> &mut File {
        &mut self.file
    }

    /// Flush, sync and release the handle
    ///
    /// # Errors
    /// Returns `AppError::ResourceClose` if buffered data cannot be persisted
    pub async fn close(mut self) -> Result<(), AppError> {
        let close_error = |source| AppError::ResourceClose {
            path: self.path.clone(),
            source,
        };

        self.file.flush().await.map_err(close_error)?;
        self.file.sync_all().await.map_err(close_error)?;
        drop(self.file);

        tracing::debug!(path = %self.path.display(), "Staging file closed");
        Ok(())
    }
}

/// Combine an operation's outcome with the result of closing its file
///
/// A close failure always wins. When both fail the operation's error is
/// logged and the close error returned.
pub fn settle<T>(outcome: Result<T, AppError>, closed: Result<(), AppError>) -> Result<T, AppError> {
    match (outcome, closed) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(close_error)) => Err(close_error),
        (Err(primary), Err(close_error)) => {
            tracing::error!(error = %primary, "Operation failed before the staging file closed");
            Err(close_error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_truncates_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snap.out");
        std::fs::write(&path, b"previous run with a long payload").unwrap();

        let mut staging = StagingFile::create(&path).await.unwrap();
        staging.writer().write_all(b"new").await.unwrap();
        staging.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[tokio::test]
    async fn create_fails_for_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("snap.out");

        let error = StagingFile::create(&path).await.err().unwrap();
        assert!(matches!(error, AppError::SnapshotIo { path: failed, .. } if failed == path));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn create_uses_owner_writable_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snap.out");

        StagingFile::create(&path).await.unwrap().close().await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o200, 0o200);
        assert_eq!(mode & 0o022, 0);
    }

    fn close_failure() -> AppError {
        AppError::ResourceClose {
            path: "/tmp/snap.out".into(),
            source: std::io::Error::other("flush failed"),
        }
    }

    #[test]
    fn settle_keeps_outcome_when_close_succeeds() {
        assert_eq!(settle(Ok(7), Ok(())).unwrap(), 7);

        let error = settle::<()>(Err(AppError::SnapshotStream("cut".into())), Ok(())).unwrap_err();
        assert!(matches!(error, AppError::SnapshotStream(_)));
    }

    #[test]
    fn settle_close_failure_overrides_success() {
        let error = settle(Ok(7), Err(close_failure())).unwrap_err();
        assert!(matches!(error, AppError::ResourceClose { .. }));
    }

    #[test]
    fn settle_close_failure_overrides_primary_failure() {
        let error = settle::<()>(
            Err(AppError::SnapshotStream("cut".into())),
            Err(close_failure()),
        )
        .unwrap_err();
        assert!(matches!(error, AppError::ResourceClose { .. }));
    }
}
