//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml, optional)
//! 3. Environment variables (override)
//!
//! The flat environment view is split into two immutable records,
//! `ClusterConfig` for Vault and `TransferConfig` for S3.

use std::fmt;
use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

/// Credential value that selects AWS IAM login instead of a static token
pub const AWS_IAM_SENTINEL: &str = "aws-iam";

/// Vault authentication credential
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Delegate to the AWS IAM auth method
    AwsIam,
    /// Static Vault token, validated before use
    Token(String),
}

impl Credential {
    pub fn parse(raw: &str) -> Self {
        if raw == AWS_IAM_SENTINEL {
            Credential::AwsIam
        } else {
            Credential::Token(raw.to_string())
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::AwsIam => f.write_str("AwsIam"),
            Credential::Token(token) => write!(f, "Token(<{} chars redacted>)", token.len()),
        }
    }
}

/// Vault cluster configuration
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Vault address (e.g., "https://vault.example.com:8200")
    pub address: String,
    /// Token or IAM delegation
    pub credential: Credential,
    /// Local staging file for the snapshot
    pub snapshot_path: PathBuf,
    /// Disable TLS certificate verification
    pub skip_verify: bool,
    /// PEM bundle with additional trusted roots
    pub ca_cert: Option<PathBuf>,
    /// Vault Enterprise namespace
    pub namespace: Option<String>,
    /// AWS IAM auth method options
    pub iam: IamAuthConfig,
}

/// AWS IAM auth method options
#[derive(Debug, Clone)]
pub struct IamAuthConfig {
    /// Mount path of the auth method (default: "aws")
    pub mount: String,
    /// Vault role; Vault infers it from the IAM principal when unset
    pub role: Option<String>,
    /// Value for the X-Vault-AWS-IAM-Server-ID header
    pub server_id: Option<String>,
    /// Region the STS request is signed for (default: "us-east-1")
    pub sts_region: String,
}

impl Default for IamAuthConfig {
    fn default() -> Self {
        Self {
            mount: "aws".to_string(),
            role: None,
            server_id: None,
            sts_region: "us-east-1".to_string(),
        }
    }
}

/// S3 destination configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Destination bucket
    pub bucket: String,
    /// Object key prefix, joined to the file name with '-'; may be empty
    pub prefix: String,
    /// Bucket region
    pub region: String,
    /// Endpoint for S3-compatible stores; enables path-style addressing
    pub endpoint_url: Option<String>,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    pub transfer: TransferConfig,
}

/// Raw environment view before validation
#[derive(Debug, Deserialize)]
struct Settings {
    vault_addr: String,
    vault_token: String,
    vault_snapshot_path: Option<PathBuf>,
    vault_skip_verify: Option<String>,
    vault_cacert: Option<PathBuf>,
    vault_namespace: Option<String>,
    vault_aws_auth_mount: String,
    vault_aws_auth_role: Option<String>,
    vault_aws_iam_server_id: Option<String>,
    vault_aws_sts_region: String,
    s3_bucket: Option<String>,
    s3_prefix: Option<String>,
    aws_region: Option<String>,
    s3_endpoint_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from file and process environment
    ///
    /// # Errors
    /// Returns `AppError::Config` if a required value is missing or malformed
    pub fn load() -> Result<Self, AppError> {
        let config = defaults()?
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::default())
            .build()?;
        Self::from_config(config)
    }

    /// Load configuration from an explicit environment source
    pub fn load_from(environment: Environment) -> Result<Self, AppError> {
        let config = defaults()?.add_source(environment).build()?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, AppError> {
        let settings: Settings = config.try_deserialize()?;

        // Unset reads as "", which is not a boolean either.
        let raw_skip_verify = settings.vault_skip_verify.unwrap_or_default();
        let skip_verify = parse_bool(&raw_skip_verify).ok_or_else(|| {
            AppError::Config(format!(
                "Invalid boolean value for VAULT_SKIP_VERIFY: {raw_skip_verify:?}"
            ))
        })?;

        let app_config = Self {
            cluster: ClusterConfig {
                address: settings.vault_addr,
                credential: Credential::parse(&settings.vault_token),
                snapshot_path: required("VAULT_SNAPSHOT_PATH", settings.vault_snapshot_path)?,
                skip_verify,
                ca_cert: settings.vault_cacert.filter(|path| !path.as_os_str().is_empty()),
                namespace: non_empty(settings.vault_namespace),
                iam: IamAuthConfig {
                    mount: settings.vault_aws_auth_mount,
                    role: non_empty(settings.vault_aws_auth_role),
                    server_id: non_empty(settings.vault_aws_iam_server_id),
                    sts_region: settings.vault_aws_sts_region,
                },
            },
            transfer: TransferConfig {
                bucket: required("S3_BUCKET", non_empty(settings.s3_bucket))?,
                prefix: settings.s3_prefix.unwrap_or_default(),
                region: required("AWS_REGION", non_empty(settings.aws_region))?,
                endpoint_url: non_empty(settings.s3_endpoint_url),
            },
        };
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.cluster.snapshot_path.as_os_str().is_empty() {
            return Err(AppError::Config(
                "VAULT_SNAPSHOT_PATH must not be empty".to_string(),
            ));
        }
        if self.cluster.snapshot_path.file_name().is_none() {
            return Err(AppError::Config(format!(
                "VAULT_SNAPSHOT_PATH must name a file, got {}",
                self.cluster.snapshot_path.display()
            )));
        }
        if self.cluster.iam.mount.trim_matches('/').is_empty() {
            return Err(AppError::Config(
                "VAULT_AWS_AUTH_MOUNT must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, AppError> {
    Ok(Config::builder()
        .set_default("vault_addr", "https://127.0.0.1:8200")?
        .set_default("vault_token", "")?
        .set_default("vault_aws_auth_mount", "aws")?
        .set_default("vault_aws_sts_region", "us-east-1")?)
}

fn required<T>(name: &str, value: Option<T>) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::Config(format!("{name} is required")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Parse a boolean the way Go's `strconv.ParseBool` does
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
