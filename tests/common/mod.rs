//! Common test utilities for E2E tests
//!
//! Vault and S3 are both replaced by `wiremock` servers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use tempfile::TempDir;
use vault_raft_backup::config::{ClusterConfig, Credential, IamAuthConfig, TransferConfig};
use vault_raft_backup::storage::SnapshotUploader;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "abcdefghijklmnopqrstuvwxyz";
pub const BUCKET: &str = "vault-backups";
pub const PREFIX: &str = "nightly";
pub const SNAPSHOT_PATH: &str = "/v1/sys/storage/raft/snapshot";
pub const UPLOAD_ID: &str = "VXBsb2FkSWQtdmF1bHQtcmFmdA";

/// Temporary staging directory with mocked Vault and S3 endpoints
pub struct TestEnv {
    pub vault: MockServer,
    pub s3: MockServer,
    pub _temp_dir: TempDir,
    pub staging_path: PathBuf,
}

impl TestEnv {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let staging_path = temp_dir.path().join("vault.snap");

        Self {
            vault: MockServer::start().await,
            s3: MockServer::start().await,
            _temp_dir: temp_dir,
            staging_path,
        }
    }

    pub fn cluster_config(&self, credential: Credential) -> ClusterConfig {
        ClusterConfig {
            address: self.vault.uri(),
            credential,
            snapshot_path: self.staging_path.clone(),
            skip_verify: false,
            ca_cert: None,
            namespace: None,
            iam: IamAuthConfig::default(),
        }
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            bucket: BUCKET.to_string(),
            prefix: PREFIX.to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some(self.s3.uri()),
        }
    }

    /// Uploader pointed at the mock S3 server with static credentials
    pub fn uploader(&self) -> SnapshotUploader {
        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(self.s3.uri())
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .credentials_provider(Credentials::new(
                "AKIDEXAMPLE",
                "test-secret",
                None,
                None,
                "vault-raft-backup-test",
            ))
            .build();

        SnapshotUploader::from_client(aws_sdk_s3::Client::from_conf(s3_config), &self.transfer_config())
    }

    /// Object path the uploader writes to for the staging file
    pub fn object_path(&self) -> String {
        format!("/{}/{}", BUCKET, object_key(&self.staging_path))
    }

    pub async fn mount_snapshot(&self, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(SNAPSHOT_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/octet-stream")
                    .set_body_bytes(body.to_vec()),
            )
            .mount(&self.vault)
            .await;
    }

    pub async fn mount_put_object(&self, expected_calls: u64) {
        Mock::given(method("PUT"))
            .and(path(self.object_path()))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"3858f62230ac3c915f300c664312c63f\""))
            .expect(expected_calls)
            .mount(&self.s3)
            .await;
    }

    /// Initiate and complete endpoints of a multipart upload
    pub async fn mount_multipart(&self, expected_completes: u64) {
        Mock::given(method("POST"))
            .and(path(self.object_path()))
            .and(query_param("uploads", ""))
            .respond_with(s3_xml(format!(
                "<InitiateMultipartUploadResult><Bucket>{BUCKET}</Bucket><Key>{}</Key><UploadId>{UPLOAD_ID}</UploadId></InitiateMultipartUploadResult>",
                object_key(&self.staging_path)
            )))
            .expect(1)
            .mount(&self.s3)
            .await;

        Mock::given(method("POST"))
            .and(path(self.object_path()))
            .and(query_param("uploadId", UPLOAD_ID))
            .respond_with(s3_xml(format!(
                "<CompleteMultipartUploadResult><Bucket>{BUCKET}</Bucket><Key>{}</Key><ETag>\"multipart-etag-3\"</ETag></CompleteMultipartUploadResult>",
                object_key(&self.staging_path)
            )))
            .expect(expected_completes)
            .mount(&self.s3)
            .await;
    }

    /// Part requests in the order they arrived, as `(part number, body)`
    pub async fn uploaded_parts(&self) -> Vec<(String, Vec<u8>)> {
        self.s3
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.method.as_str() == "PUT")
            .filter_map(|request| {
                let part_number = request
                    .url
                    .query_pairs()
                    .find(|(name, _)| name == "partNumber")
                    .map(|(_, value)| value.into_owned())?;
                Some((part_number, request.body))
            })
            .collect()
    }

    /// Bodies of every request the S3 mock received
    pub async fn uploaded_bodies(&self) -> Vec<Vec<u8>> {
        self.s3
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.method.as_str() == "PUT")
            .map(|request| request.body)
            .collect()
    }
}

pub fn object_key(staging_path: &Path) -> String {
    format!(
        "{}-{}",
        PREFIX,
        staging_path.file_name().unwrap().to_string_lossy()
    )
}

/// Whether `haystack` contains `needle` as a contiguous run
///
/// The SDK may wrap the payload in aws-chunked framing, so uploads are
/// checked for containment rather than equality.
pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

pub fn s3_access_denied() -> ResponseTemplate {
    ResponseTemplate::new(403)
        .insert_header("content-type", "application/xml")
        .set_body_string(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>AccessDenied</Code><Message>Access Denied</Message><RequestId>TEST</RequestId></Error>",
        )
}

pub fn s3_xml(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/xml")
        .set_body_string(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{body}"))
}
