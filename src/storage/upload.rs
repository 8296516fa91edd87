//! Snapshot upload to S3
//!
//! One logical upload per run, keyed `{prefix}-{file name}`. Files up to
//! the part size go out as a single `PutObject`; larger ones as a
//! multipart upload that is aborted if any part fails.

use std::fmt;
use std::path::Path;

use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart};

use crate::config::TransferConfig;
use crate::error::AppError;
use crate::storage::{SnapshotStore, build_s3_client};

const SNAPSHOT_CONTENT_TYPE: &str = "application/octet-stream";

/// Smallest part S3 accepts, except for the last one
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Upper bound on parts in one multipart upload
pub const MAX_PARTS: u64 = 10_000;

/// Where an uploaded snapshot ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadLocation {
    /// Destination bucket
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Addressable URL of the object
    pub url: String,
    /// ETag returned by the store
    pub e_tag: Option<String>,
    /// Version id, when bucket versioning is on
    pub version_id: Option<String>,
}

impl fmt::Display for UploadLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Derive the object key for a staged snapshot
///
/// # Example
/// ```
/// use std::path::Path;
/// use vault_raft_backup::storage::object_key;
///
/// let key = object_key("nightly", Path::new("/tmp/snap.out")).unwrap();
/// assert_eq!(key, "nightly-snap.out");
/// ```
///
/// # Errors
/// Returns `AppError::UploadOpen` if the path has no file name
pub fn object_key(prefix: &str, path: &Path) -> Result<String, AppError> {
    let base = path.file_name().ok_or_else(|| AppError::UploadOpen {
        path: path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "snapshot path has no file name",
        ),
    })?;
    Ok(format!("{}-{}", prefix, base.to_string_lossy()))
}

/// Uploads staged snapshots to a single bucket
pub struct SnapshotUploader {
    /// S3 client
    client: S3Client,
    /// Destination bucket
    bucket: String,
    /// Key prefix
    prefix: String,
    /// Bucket region, used for the object URL
    region: String,
    /// Custom endpoint, used for the object URL
    endpoint_url: Option<String>,
    /// Multipart part size; smaller files are sent in one request
    part_size: u64,
}

impl SnapshotUploader {
    /// Create an uploader from the default AWS configuration chain
    ///
    /// # Arguments
    /// * `config` - Destination bucket, prefix, region and endpoint
    pub async fn new(config: &TransferConfig) -> Self {
        let client = build_s3_client(config).await;
        Self::from_client(client, config)
    }

    /// Create an uploader around an existing S3 client
    pub fn from_client(client: S3Client, config: &TransferConfig) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            part_size: MIN_PART_SIZE,
        }
    }

    /// Override the multipart part size
    ///
    /// S3 itself rejects parts below `MIN_PART_SIZE`; smaller values are
    /// only useful against S3-compatible stores.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Part size for a file of `size` bytes, grown to stay within `MAX_PARTS`
    fn part_size_for(&self, size: u64) -> u64 {
        self.part_size.max(size.div_ceil(MAX_PARTS))
    }

    fn transfer_error(&self, message: String) -> AppError {
        AppError::UploadTransfer {
            bucket: self.bucket.clone(),
            message,
        }
    }

    async fn put_single(
        &self,
        path: &Path,
        key: &str,
        size: u64,
    ) -> Result<(Option<String>, Option<String>), AppError> {
        let open_error = |source| AppError::UploadOpen {
            path: path.to_path_buf(),
            source,
        };

        let file = tokio::fs::File::open(path).await.map_err(open_error)?;
        // The body owns the read handle from here and releases it when the
        // request completes.
        let body = ByteStream::read_from()
            .file(file)
            .build()
            .await
            .map_err(|error| open_error(std::io::Error::other(error.to_string())))?;

        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(SNAPSHOT_CONTENT_TYPE)
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .map_err(|error| self.transfer_error(DisplayErrorContext(&error).to_string()))?;

        Ok((
            output.e_tag().map(str::to_string),
            output.version_id().map(str::to_string),
        ))
    }

    async fn put_multipart(
        &self,
        path: &Path,
        key: &str,
        size: u64,
    ) -> Result<(Option<String>, Option<String>), AppError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(SNAPSHOT_CONTENT_TYPE)
            .checksum_algorithm(ChecksumAlgorithm::Crc32)
            .send()
            .await
            .map_err(|error| self.transfer_error(DisplayErrorContext(&error).to_string()))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| self.transfer_error("multipart upload returned no upload id".to_string()))?
            .to_string();

        match self.send_parts(path, key, &upload_id, size).await {
            Ok(output) => Ok(output),
            Err(error) => {
                tracing::warn!(key = %key, upload_id = %upload_id, "Aborting multipart upload");
                if let Err(abort_error) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::error!(
                        error = %DisplayErrorContext(&abort_error),
                        upload_id = %upload_id,
                        "Multipart upload could not be aborted"
                    );
                }
                Err(error)
            }
        }
    }

    async fn send_parts(
        &self,
        path: &Path,
        key: &str,
        upload_id: &str,
        size: u64,
    ) -> Result<(Option<String>, Option<String>), AppError> {
        let part_size = self.part_size_for(size);
        let mut parts = Vec::new();
        let mut offset = 0;
        let mut part_number = 1;

        while offset < size {
            let length = part_size.min(size - offset);
            let body = ByteStream::read_from()
                .path(path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|error| AppError::UploadOpen {
                    path: path.to_path_buf(),
                    source: std::io::Error::other(error.to_string()),
                })?;

            tracing::debug!(part_number, offset, length, "Uploading snapshot part");
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(length as i64)
                .checksum_algorithm(ChecksumAlgorithm::Crc32)
                .body(body)
                .send()
                .await
                .map_err(|error| self.transfer_error(DisplayErrorContext(&error).to_string()))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .set_checksum_crc32(output.checksum_crc32().map(str::to_string))
                    .build(),
            );
            offset += length;
            part_number += 1;
        }

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|error| self.transfer_error(DisplayErrorContext(&error).to_string()))?;

        Ok((
            output.e_tag().map(str::to_string),
            output.version_id().map(str::to_string),
        ))
    }

    fn object_url(&self, key: &str) -> String {
        match &self.endpoint_url {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            ),
        }
    }
}

impl SnapshotStore for SnapshotUploader {
    /// Upload the snapshot file at `path`
    ///
    /// # Errors
    /// - `AppError::UploadOpen` if the file cannot be opened for reading
    /// - `AppError::UploadTransfer` if S3 rejects the request or it fails
    async fn upload(&self, path: &Path) -> Result<UploadLocation, AppError> {
        let key = object_key(&self.prefix, path)?;
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|source| AppError::UploadOpen {
                path: path.to_path_buf(),
                source,
            })?
            .len();

        let multipart = size > self.part_size;
        tracing::info!(bucket = %self.bucket, key = %key, size, multipart, "Uploading snapshot");
        let (e_tag, version_id) = if multipart {
            self.put_multipart(path, &key, size).await?
        } else {
            self.put_single(path, &key, size).await?
        };

        let location = UploadLocation {
            url: self.object_url(&key),
            bucket: self.bucket.clone(),
            key,
            e_tag,
            version_id,
        };
        tracing::info!(
            location = %location,
            e_tag = ?location.e_tag,
            version_id = ?location.version_id,
            "Snapshot uploaded"
        );
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn transfer_config(endpoint_url: Option<&str>) -> TransferConfig {
        TransferConfig {
            bucket: "vault-backups".to_string(),
            prefix: "nightly".to_string(),
            region: "eu-west-1".to_string(),
            endpoint_url: endpoint_url.map(str::to_string),
        }
    }

    fn uploader(endpoint_url: Option<&str>) -> SnapshotUploader {
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("eu-west-1"))
            .build();
        SnapshotUploader::from_client(S3Client::from_conf(s3_config), &transfer_config(endpoint_url))
    }

    #[test]
    fn object_key_joins_prefix_and_file_name() {
        assert_eq!(
            object_key("nightly", Path::new("/tmp/snap.out")).unwrap(),
            "nightly-snap.out"
        );
        assert_eq!(
            object_key("vault", Path::new("relative/raft.snap")).unwrap(),
            "vault-raft.snap"
        );
        assert_eq!(
            object_key("", Path::new("/tmp/snap.out")).unwrap(),
            "-snap.out"
        );
    }

    #[test]
    fn object_key_rejects_path_without_file_name() {
        let error = object_key("nightly", Path::new("/")).unwrap_err();
        assert!(matches!(error, AppError::UploadOpen { .. }));
    }

    #[test]
    fn object_url_uses_virtual_hosted_style_on_aws() {
        assert_eq!(
            uploader(None).object_url("nightly-snap.out"),
            "https://vault-backups.s3.eu-west-1.amazonaws.com/nightly-snap.out"
        );
    }

    #[test]
    fn object_url_uses_path_style_on_custom_endpoint() {
        assert_eq!(
            uploader(Some("http://minio:9000/")).object_url("nightly-snap.out"),
            "http://minio:9000/vault-backups/nightly-snap.out"
        );
    }

    #[test]
    fn part_size_grows_to_stay_within_part_limit() {
        let uploader = uploader(None);
        assert_eq!(uploader.part_size_for(1024), MIN_PART_SIZE);
        assert_eq!(uploader.part_size_for(MIN_PART_SIZE * MAX_PARTS), MIN_PART_SIZE);
        assert_eq!(
            uploader.part_size_for(MIN_PART_SIZE * MAX_PARTS + 1),
            MIN_PART_SIZE + 1
        );

        assert_eq!(uploader.with_part_size(0).part_size_for(10), 1);
    }

    #[tokio::test]
    async fn upload_fails_to_open_missing_file() {
        let path = PathBuf::from("/nonexistent/dir/snap.out");

        let error = uploader(None).upload(&path).await.unwrap_err();
        assert!(matches!(error, AppError::UploadOpen { path: failed, .. } if failed == path));
    }
}
