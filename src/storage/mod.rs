//! S3 snapshot storage
//!
//! Handles:
//! - S3 client construction (AWS or S3-compatible endpoint)
//! - Snapshot upload

mod upload;

use std::path::Path;

use aws_sdk_s3::Client as S3Client;

use crate::config::TransferConfig;
use crate::error::AppError;

pub use upload::{SnapshotUploader, UploadLocation, object_key};

/// Destination for a staged snapshot
#[allow(async_fn_in_trait)]
pub trait SnapshotStore {
    /// Transfer the complete file at `path` and return its location
    async fn upload(&self, path: &Path) -> Result<UploadLocation, AppError>;
}

/// S3 client for the destination bucket
///
/// Retries are off: a failed upload is reported, never repeated.
pub(crate) async fn build_s3_client(config: &TransferConfig) -> S3Client {
    use aws_config::BehaviorVersion;
    use aws_sdk_s3::config::Region;
    use aws_sdk_s3::config::retry::RetryConfig;

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .load()
        .await;

    let mut builder =
        aws_sdk_s3::config::Builder::from(&sdk_config).retry_config(RetryConfig::disabled());
    if let Some(endpoint) = &config.endpoint_url {
        builder = builder.endpoint_url(endpoint).force_path_style(true);
    }

    S3Client::from_conf(builder.build())
}
