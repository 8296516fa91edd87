//! Vault HTTP API client
//!
//! `VaultClient` holds the connection settings. Authenticating consumes it
//! and yields a `VaultSession`, the only type that can request snapshots.

mod aws_iam;

pub use aws_iam::{LoginPayload, default_provider, login_payload};

use aws_credential_types::provider::SharedCredentialsProvider;
use futures::StreamExt;
use reqwest::header::HeaderValue;
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::config::{ClusterConfig, Credential, IamAuthConfig};
use crate::error::{AppError, AuthStep};
use crate::snapshot::SnapshotSource;

/// Length of a Vault service token accepted as a static credential
pub const TOKEN_LENGTH: usize = 26;

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const RAFT_SNAPSHOT_PATH: &str = "v1/sys/storage/raft/snapshot";

/// Vault error body: `{"errors": ["..."]}`
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: Option<LoginAuth>,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    #[serde(default)]
    client_token: String,
    #[serde(default)]
    policies: Vec<String>,
    #[serde(default)]
    lease_duration: u64,
}

/// Unauthenticated Vault client
pub struct VaultClient {
    http: reqwest::Client,
    address: Url,
    namespace: Option<String>,
    iam: IamAuthConfig,
}

impl VaultClient {
    /// Build a client for the configured address and TLS settings
    ///
    /// # Errors
    /// Returns `AppError::ConnectionConfig` if the address is not an
    /// http(s) URL, the CA bundle is unusable, or the TLS backend fails
    /// to initialize
    pub fn new(config: &ClusterConfig) -> Result<Self, AppError> {
        let address = parse_address(&config.address)?;

        let mut builder = reqwest::Client::builder()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .danger_accept_invalid_certs(config.skip_verify);

        if let Some(ca_cert) = &config.ca_cert {
            let pem = std::fs::read(ca_cert).map_err(|error| {
                AppError::ConnectionConfig(format!(
                    "failed to read CA certificate {}: {error}",
                    ca_cert.display()
                ))
            })?;
            let certificates = reqwest::Certificate::from_pem_bundle(&pem).map_err(|error| {
                AppError::ConnectionConfig(format!(
                    "invalid CA certificate {}: {error}",
                    ca_cert.display()
                ))
            })?;
            if certificates.is_empty() {
                return Err(AppError::ConnectionConfig(format!(
                    "no certificates found in {}",
                    ca_cert.display()
                )));
            }
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }

        if config.skip_verify {
            tracing::warn!(address = %address, "TLS certificate verification is disabled");
        }

        let http = builder.build().map_err(|error| {
            AppError::ConnectionConfig(format!("Vault TLS configuration failed to initialize: {error}"))
        })?;

        Ok(Self {
            http,
            address,
            namespace: config.namespace.clone(),
            iam: config.iam.clone(),
        })
    }

    pub fn address(&self) -> &Url {
        &self.address
    }

    /// Start a session with the given credential
    ///
    /// A static token is only checked for its length; no request is made.
    /// The IAM sentinel runs the AWS IAM login with credentials from the
    /// default AWS provider chain.
    ///
    /// # Errors
    /// - `AppError::InvalidCredential` for a token of the wrong length
    /// - `AppError::AuthMethod` if the IAM login fails at any step
    pub async fn authenticate(self, credential: &Credential) -> Result<VaultSession, AppError> {
        match credential {
            Credential::Token(token) => {
                validate_token(token)?;
                tracing::info!("Using static Vault token");
                Ok(VaultSession {
                    client: self,
                    token: token.clone(),
                })
            }
            Credential::AwsIam => {
                let provider = default_provider().await.inspect_err(|error| {
                    tracing::error!(%error, "AWS IAM authentication could not be initialized");
                })?;
                self.login_aws_iam(&provider).await
            }
        }
    }

    /// Log in through the AWS IAM auth method
    ///
    /// # Errors
    /// Returns `AppError::AuthMethod` tagged with the failing `AuthStep`
    pub async fn login_aws_iam(
        self,
        provider: &SharedCredentialsProvider,
    ) -> Result<VaultSession, AppError> {
        let credentials = aws_iam::resolve_credentials(provider)
            .await
            .inspect_err(|error| {
                tracing::error!(%error, "AWS credentials could not be resolved");
            })?;

        let payload = login_payload(&credentials, &self.iam, chrono::Utc::now())?;
        let mount = self.iam.mount.trim_matches('/');
        let url = self
            .endpoint(&format!("v1/auth/{mount}/login"))
            .map_err(|error| AppError::auth(AuthStep::Login, error.to_string()))?;

        tracing::info!(mount = %mount, role = ?self.iam.role, "Logging in with AWS IAM auth method");
        let response = self
            .request(Method::POST, url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                tracing::error!(%error, "AWS IAM login request failed");
                AppError::auth(AuthStep::Login, error.to_string())
            })?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            tracing::error!(error = %message, "Vault rejected AWS IAM login");
            return Err(AppError::auth(AuthStep::Login, message));
        }

        let login: LoginResponse = response.json().await.map_err(|error| {
            tracing::error!(%error, "AWS IAM login response could not be decoded");
            AppError::auth(AuthStep::Login, format!("invalid login response: {error}"))
        })?;

        let auth = login
            .auth
            .filter(|auth| !auth.client_token.is_empty())
            .ok_or_else(|| {
                tracing::error!("AWS IAM login returned no auth info");
                AppError::auth(AuthStep::EmptySession, "Vault returned no client token")
            })?;

        tracing::info!(
            policies = ?auth.policies,
            lease_duration = auth.lease_duration,
            "AWS IAM login succeeded"
        );
        Ok(VaultSession {
            client: self,
            token: auth.client_token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.address.join(path)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.namespace {
            Some(namespace) => request.header(NAMESPACE_HEADER, namespace),
            None => request,
        }
    }
}

/// Authenticated Vault client
pub struct VaultSession {
    client: VaultClient,
    token: String,
}

impl VaultSession {
    pub fn token(&self) -> &str {
        &self.token
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, String> {
        let url = self.client.endpoint(path).map_err(|error| error.to_string())?;
        let mut token = HeaderValue::from_str(&self.token)
            .map_err(|_| "Vault token is not a valid header value".to_string())?;
        token.set_sensitive(true);
        Ok(self.client.request(method, url).header(TOKEN_HEADER, token))
    }
}

impl SnapshotSource for VaultSession {
    async fn stream_snapshot<W>(&self, sink: &mut W) -> Result<u64, AppError>
    where
        W: AsyncWrite + Unpin,
    {
        let request = self
            .request(Method::GET, RAFT_SNAPSHOT_PATH)
            .map_err(AppError::SnapshotStream)?;

        let response = request
            .send()
            .await
            .map_err(|error| AppError::SnapshotStream(format!("request failed: {error}")))?;

        if !response.status().is_success() {
            return Err(AppError::SnapshotStream(error_message(response).await));
        }

        let mut body = Box::pin(response.bytes_stream());
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|error| {
                AppError::SnapshotStream(format!("reading snapshot body failed: {error}"))
            })?;
            sink.write_all(&chunk).await.map_err(|error| {
                AppError::SnapshotStream(format!("writing snapshot failed: {error}"))
            })?;
            written += chunk.len() as u64;
        }

        tracing::debug!(bytes = written, "Raft snapshot stream finished");
        Ok(written)
    }
}

/// Check a static token before it is used
///
/// # Errors
/// Returns `AppError::InvalidCredential` unless the token has exactly
/// `TOKEN_LENGTH` characters
pub fn validate_token(token: &str) -> Result<(), AppError> {
    let actual = token.chars().count();
    if actual != TOKEN_LENGTH {
        return Err(AppError::InvalidCredential {
            expected: TOKEN_LENGTH,
            actual,
        });
    }
    Ok(())
}

fn parse_address(raw: &str) -> Result<Url, AppError> {
    let mut address = Url::parse(raw.trim()).map_err(|error| {
        AppError::ConnectionConfig(format!("invalid Vault address {raw:?}: {error}"))
    })?;

    if !matches!(address.scheme(), "http" | "https") {
        return Err(AppError::ConnectionConfig(format!(
            "Vault address must use http or https, got {:?}",
            address.scheme()
        )));
    }

    // Joining relative API paths needs a trailing slash on the base.
    if !address.path().ends_with('/') {
        let path = format!("{}/", address.path());
        address.set_path(&path);
    }
    Ok(address)
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) if !parsed.errors.is_empty() => {
            format!("{status}: {}", parsed.errors.join("; "))
        }
        _ if body.trim().is_empty() => status.to_string(),
        _ => format!("{status}: {}", body.trim()),
    }
}
