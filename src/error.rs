//! Error types for vault-raft-backup
//!
//! Every stage of the pipeline returns `AppError`. Nothing is recovered
//! locally; the binary entry point decides on termination.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stage an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Authenticate,
    Snapshot,
    Upload,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Configure => "configuration",
            Stage::Authenticate => "Vault authentication",
            Stage::Snapshot => "Vault raft snapshot",
            Stage::Upload => "S3 upload",
            Stage::Cleanup => "snapshot file close",
        };
        f.write_str(name)
    }
}

/// Step of the AWS IAM login that failed
///
/// The three steps share `AppError::AuthMethod` but stay distinguishable
/// in logs and in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    /// No AWS credentials could be loaded for signing
    ProviderInit,
    /// The login request failed or Vault rejected it
    Login,
    /// Vault answered but returned no client token
    EmptySession,
}

impl fmt::Display for AuthStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthStep::ProviderInit => "unable to initialize AWS IAM authentication",
            AuthStep::Login => "unable to login to AWS IAM auth method",
            AuthStep::EmptySession => "no auth info was returned after login",
        };
        f.write_str(name)
    }
}

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Environment could not be turned into configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Vault address or TLS settings are unusable
    #[error("Vault client configuration failed: {0}")]
    ConnectionConfig(String),

    /// AWS IAM login against Vault failed
    #[error("Vault AWS IAM auth failed, {step}: {message}")]
    AuthMethod { step: AuthStep, message: String },

    /// Static token has the wrong shape
    #[error("The Vault token is invalid: expected {expected} characters, got {actual}")]
    InvalidCredential { expected: usize, actual: usize },

    /// Staging file could not be created or truncated
    #[error("Snapshot file at {} could not be created: {source}", .path.display())]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot request or body transfer failed
    #[error("Vault raft snapshot invocation failed: {0}")]
    SnapshotStream(String),

    /// Staging file could not be opened for upload
    #[error("Failed to open snapshot file {}: {source}", .path.display())]
    UploadOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Object store rejected or never received the snapshot
    #[error("Vault backup failed to upload to S3 bucket {bucket}: {message}")]
    UploadTransfer { bucket: String, message: String },

    /// Staging file could not be flushed and closed
    #[error("Vault raft snapshot file {} failed to close: {source}", .path.display())]
    ResourceClose {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AppError {
    /// Stage the error is reported under
    pub fn stage(&self) -> Stage {
        match self {
            AppError::Config(_) => Stage::Configure,
            AppError::ConnectionConfig(_)
            | AppError::AuthMethod { .. }
            | AppError::InvalidCredential { .. } => Stage::Authenticate,
            AppError::SnapshotIo { .. } | AppError::SnapshotStream(_) => Stage::Snapshot,
            AppError::UploadOpen { .. } | AppError::UploadTransfer { .. } => Stage::Upload,
            AppError::ResourceClose { .. } => Stage::Cleanup,
        }
    }

    pub(crate) fn auth(step: AuthStep, message: impl Into<String>) -> Self {
        AppError::AuthMethod {
            step,
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
