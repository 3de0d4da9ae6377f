//! Temporary credentials through the STS Query API (`AssumeRole`).
//!
//! Instance lookups for an environment run under that environment's
//! management role, which usually lives in the environment's own account.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use super::ec2::error_summary;
use super::sigv4::SigV4Signer;
use crate::errors::AppError;
use crate::services::http::ServiceClient;

pub(crate) const SERVICE: &str = "sts";
const API_VERSION: &str = "2011-06-15";
/// STS minimum; a credential set serves one lookup.
const SESSION_DURATION_SECS: u32 = 900;
const MAX_SESSION_NAME_LEN: usize = 64;

static ACCESS_KEY_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<AccessKeyId>\s*([^<\s]+)\s*</AccessKeyId>").expect("invalid AccessKeyId regex")
});

static SECRET_ACCESS_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<SecretAccessKey>\s*([^<\s]+)\s*</SecretAccessKey>")
        .expect("invalid SecretAccessKey regex")
});

static SESSION_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<SessionToken>\s*([^<\s]+)\s*</SessionToken>").expect("invalid SessionToken regex")
});

static EXPIRATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<Expiration>\s*([^<\s]+)\s*</Expiration>").expect("invalid Expiration regex")
});

/// Credentials returned by `AssumeRole`.
#[derive(Clone)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<String>,
}

impl std::fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl TemporaryCredentials {
    /// Signer for `service` in `region` using these credentials.
    pub fn signer(&self, region: &str, service: &str) -> SigV4Signer {
        SigV4Signer::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            Some(self.session_token.clone()),
            region,
            service,
        )
    }
}

/// Credentials block of an `AssumeRoleResponse`.
pub fn parse_credentials(xml: &str) -> Option<TemporaryCredentials> {
    let field = |re: &Regex| {
        re.captures(xml)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };
    Some(TemporaryCredentials {
        access_key_id: field(&ACCESS_KEY_ID)?,
        secret_access_key: field(&SECRET_ACCESS_KEY)?,
        session_token: field(&SESSION_TOKEN)?,
        expiration: field(&EXPIRATION),
    })
}

/// `RoleSessionName` for an environment: `connbroker-<envId>`, limited to
/// the characters and length STS accepts.
pub fn session_name(environment_id: &str) -> String {
    format!("connbroker-{}", environment_id)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "+=,.@-_".contains(c) {
                c
            } else {
                '-'
            }
        })
        .take(MAX_SESSION_NAME_LEN)
        .collect()
}

#[derive(Clone)]
pub struct StsClient {
    endpoint: String,
    http: ServiceClient,
}

impl StsClient {
    pub fn new(endpoint: impl Into<String>, http: ServiceClient) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    /// Assume `role_arn`, signing the call with `base` (the broker's own
    /// credentials).
    pub async fn assume_role(
        &self,
        base: &SigV4Signer,
        role_arn: &str,
        session_name: &str,
    ) -> Result<TemporaryCredentials, AppError> {
        let body = format!(
            "Action=AssumeRole&Version={}&RoleArn={}&RoleSessionName={}&DurationSeconds={}",
            API_VERSION,
            urlencoding::encode(role_arn),
            urlencoding::encode(session_name),
            SESSION_DURATION_SECS
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
        );
        base.for_service(SERVICE)
            .sign("POST", &self.endpoint, &mut headers, body.as_bytes())?;

        tracing::debug!(role_arn, session_name, "AssumeRole");
        let (status, text) = self
            .http
            .post_raw(SERVICE, &self.endpoint, headers, body.into_bytes())
            .await?;

        if !status.is_success() {
            let summary = error_summary(&text).unwrap_or_else(|| format!("status={}", status));
            return Err(AppError::upstream(SERVICE, summary));
        }

        parse_credentials(&text)
            .ok_or_else(|| AppError::upstream(SERVICE, "AssumeRole response carried no credentials"))
    }
}
