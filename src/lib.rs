//! vault-raft-backup - Vault integrated storage snapshots to S3
//!
//! # Pipeline
//!
//! ```text
//! configure ──▶ authenticate ──▶ snapshot ──▶ upload ──▶ report
//!  AppConfig     VaultSession     staging file  UploadLocation
//! ```
//!
//! Each stage consumes the previous stage's output and the first error
//! aborts the run. Nothing is retried.
//!
//! # Modules
//!
//! - `config`: Environment-derived configuration
//! - `error`: Error types
//! - `vault`: Vault client, token and AWS IAM authentication
//! - `snapshot`: Raft snapshot streaming into the staging file
//! - `staging`: Staging file open/close discipline
//! - `storage`: S3 upload

pub mod config;
pub mod error;
pub mod snapshot;
pub mod staging;
pub mod storage;
pub mod vault;

use std::path::Path;

use crate::config::{ClusterConfig, TransferConfig};
use crate::error::AppError;
use crate::snapshot::SnapshotSource;
use crate::storage::{SnapshotStore, SnapshotUploader, UploadLocation};
use crate::vault::VaultClient;

/// Snapshot into `staging_path`, then upload the closed file
///
/// The store is never called unless the snapshot completed and its file
/// closed cleanly.
pub async fn run<S, U>(source: &S, store: &U, staging_path: &Path) -> Result<UploadLocation, AppError>
where
    S: SnapshotSource,
    U: SnapshotStore,
{
    let staged = snapshot::take_snapshot(source, staging_path).await?;
    store.upload(&staged.path).await
}

/// Run the whole pipeline against Vault and S3
///
/// # Steps
/// 1. Build the Vault client
/// 2. Authenticate with token or AWS IAM
/// 3. Stream the raft snapshot to the staging file
/// 4. Upload the staging file to S3
pub async fn execute(
    cluster: &ClusterConfig,
    transfer: &TransferConfig,
) -> Result<UploadLocation, AppError> {
    let client = VaultClient::new(cluster)?;
    tracing::info!(address = %client.address(), "Vault client configured");

    let session = client.authenticate(&cluster.credential).await?;
    let uploader = SnapshotUploader::new(transfer).await;

    run(&session, &uploader, &cluster.snapshot_path).await
}
