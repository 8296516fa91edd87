//! Raft snapshot staging
//!
//! Streams a point-in-time snapshot of Vault's integrated storage into
//! the local staging file.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWrite;

use crate::error::AppError;
use crate::staging::{StagingFile, settle};

/// Anything that can stream a raft snapshot into a writer
#[allow(async_fn_in_trait)]
pub trait SnapshotSource {
    /// Stream the whole snapshot into `sink`
    ///
    /// # Returns
    /// Number of bytes written
    ///
    /// # Errors
    /// Returns `AppError::SnapshotStream` if the request or the transfer fails
    async fn stream_snapshot<W>(&self, sink: &mut W) -> Result<u64, AppError>
    where
        W: AsyncWrite + Unpin;
}

/// Closed staging file holding a complete snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSnapshot {
    pub path: PathBuf,
    pub size: u64,
}

/// Take a snapshot into the file at `path`
///
/// The file is created or truncated first, so a partial file left by an
/// earlier, interrupted run never survives. It is closed on every return
/// path; a stream failure leaves undefined content behind and must not be
/// uploaded.
///
/// # Errors
/// - `AppError::SnapshotIo` if the file cannot be created
/// - `AppError::SnapshotStream` if the snapshot call fails
/// - `AppError::ResourceClose` if the file cannot be flushed and closed
pub async fn take_snapshot<S>(source: &S, path: &Path) -> Result<StagedSnapshot, AppError>
where
    S: SnapshotSource,
{
    let mut staging = StagingFile::create(path).await?;

    tracing::info!(path = %path.display(), "Streaming raft snapshot");
    let streamed = source.stream_snapshot(staging.writer()).await;
    if let Err(error) = &streamed {
        tracing::error!(%error, path = %path.display(), "Raft snapshot stream failed");
    }

    let size = settle(streamed, staging.close().await)?;

    tracing::info!(path = %path.display(), size, "Raft snapshot staged");
    Ok(StagedSnapshot {
        path: path.to_path_buf(),
        size,
    })
}
