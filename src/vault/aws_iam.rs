//! Vault AWS IAM auth method
//!
//! The login proves an IAM identity by handing Vault a pre-signed
//! `sts:GetCallerIdentity` request, which Vault replays against STS.
//! The request is signed with AWS Signature Version 4 by `aws-sigv4`.

use std::collections::BTreeMap;
use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_sigv4::http_request::{
    SignableBody, SignableRequest, SigningParams, SigningSettings, sign,
};
use aws_sigv4::sign::v4;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::IamAuthConfig;
use crate::error::{AppError, AuthStep};

const STS_REQUEST_BODY: &str = "Action=GetCallerIdentity&Version=2011-06-15";
const STS_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const STS_SERVICE: &str = "sts";
const SERVER_ID_HEADER: &str = "x-vault-aws-iam-server-id";

/// Body of `POST /v1/auth/{mount}/login`
#[derive(Debug, Serialize)]
pub struct LoginPayload {
    pub iam_http_request_method: &'static str,
    pub iam_request_url: String,
    pub iam_request_body: String,
    pub iam_request_headers: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Credentials provider from the default AWS chain
///
/// Environment, shared profile, web identity, ECS and EC2 instance
/// metadata are tried in that order.
pub async fn default_provider() -> Result<SharedCredentialsProvider, AppError> {
    let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .load()
        .await;

    sdk_config.credentials_provider().ok_or_else(|| {
        AppError::auth(
            AuthStep::ProviderInit,
            "no AWS credentials provider is configured",
        )
    })
}

pub(crate) async fn resolve_credentials(
    provider: &SharedCredentialsProvider,
) -> Result<Credentials, AppError> {
    provider
        .provide_credentials()
        .await
        .map_err(|error| AppError::auth(AuthStep::ProviderInit, error.to_string()))
}

/// Build the login payload from a freshly signed STS request
pub fn login_payload(
    credentials: &Credentials,
    iam: &IamAuthConfig,
    now: DateTime<Utc>,
) -> Result<LoginPayload, AppError> {
    let url = sts_endpoint(&iam.sts_region);
    let headers = sign_get_caller_identity(credentials, iam, &url, now)?;

    let header_map: BTreeMap<&str, Vec<&str>> = headers
        .iter()
        .map(|(name, value)| (*name, vec![value.as_str()]))
        .collect();
    let headers_json = serde_json::to_vec(&header_map).map_err(|error| {
        AppError::auth(
            AuthStep::Login,
            format!("failed to encode STS request headers: {error}"),
        )
    })?;

    Ok(LoginPayload {
        iam_http_request_method: "POST",
        iam_request_url: BASE64_STANDARD.encode(url.as_bytes()),
        iam_request_body: BASE64_STANDARD.encode(STS_REQUEST_BODY.as_bytes()),
        iam_request_headers: BASE64_STANDARD.encode(headers_json),
        role: iam.role.clone(),
    })
}

fn sts_endpoint(region: &str) -> String {
    if region == "us-east-1" {
        "https://sts.amazonaws.com/".to_string()
    } else {
        format!("https://sts.{region}.amazonaws.com/")
    }
}

/// Sign the STS request and return the headers Vault has to replay
///
/// `host` is signed but left out: Vault derives it from the request URL.
fn sign_get_caller_identity(
    credentials: &Credentials,
    iam: &IamAuthConfig,
    url: &str,
    now: DateTime<Utc>,
) -> Result<BTreeMap<&'static str, String>, AppError> {
    let signing_error =
        |error: &dyn std::fmt::Display| AppError::auth(AuthStep::Login, format!("signing failed: {error}"));

    let mut headers: BTreeMap<&'static str, String> = BTreeMap::new();
    headers.insert("content-type", STS_CONTENT_TYPE.to_string());
    if let Some(server_id) = &iam.server_id {
        headers.insert(SERVER_ID_HEADER, server_id.clone());
    }

    let identity = credentials.clone().into();
    let params: SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(&iam.sts_region)
        .name(STS_SERVICE)
        .time(SystemTime::from(now))
        .settings(SigningSettings::default())
        .build()
        .map_err(|error| signing_error(&error))?
        .into();

    let request = SignableRequest::new(
        "POST",
        url,
        headers.iter().map(|(name, value)| (*name, value.as_str())),
        SignableBody::Bytes(STS_REQUEST_BODY.as_bytes()),
    )
    .map_err(|error| signing_error(&error))?;

    let (instructions, _signature) = sign(request, &params)
        .map_err(|error| signing_error(&error))?
        .into_parts();
    let (signed_headers, _query) = instructions.into_parts();

    for header in signed_headers {
        headers.insert(header.name(), header.value().to_string());
    }
    Ok(headers)
}
