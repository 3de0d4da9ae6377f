use std::collections::HashMap;

use serde::Deserialize;

use crate::services::settings::IS_APP_STREAM_ENABLED;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Route connections through the streaming gateway.
    /// Set via BROKER_APPSTREAM_ENABLED or `isAppStreamEnabled` in
    /// BROKER_SETTINGS. Default: false.
    pub appstream_enabled: bool,
    /// Base URL of the service that mints streaming URLs.
    pub streaming_api_url: String,
    /// Base URL of the environment connection service (private SageMaker URLs).
    pub environment_api_url: String,
    /// Shared key required on the HTTP API. Unset = open API (local dev).
    pub api_key: Option<String>,
    /// Per-request timeout for collaborator calls, retries included.
    pub http_timeout_secs: u64,
    /// Transient-failure retries for collaborator calls.
    pub http_max_retries: u32,
    pub aws: AwsConfig,
    /// Extra boolean settings from BROKER_SETTINGS ("key=true,other=false").
    pub settings: HashMap<String, bool>,
    pub log_json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub ec2_endpoint: String,
    pub sts_endpoint: String,
    /// Management role per environment id, from BROKER_ENVIRONMENT_ROLES
    /// ("env-1=arn:aws:iam::111122223333:role/env-mgmt,..."). Lookups for
    /// environments without an entry use the broker's own credentials.
    pub environment_roles: HashMap<String, String>,
}

impl AwsConfig {
    pub fn has_credentials(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let region = std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-1".into());

    let aws = AwsConfig {
        ec2_endpoint: std::env::var("BROKER_EC2_ENDPOINT")
            .unwrap_or_else(|_| format!("https://ec2.{}.amazonaws.com", region)),
        sts_endpoint: std::env::var("BROKER_STS_ENDPOINT")
            .unwrap_or_else(|_| format!("https://sts.{}.amazonaws.com", region)),
        environment_roles: parse_pairs(&std::env::var("BROKER_ENVIRONMENT_ROLES").unwrap_or_default())
            .into_iter()
            .collect(),
        region,
        access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
        secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
        session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
    };

    if !aws.has_credentials() {
        let env_mode = std::env::var("BROKER_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY are not set. \
                 SSH connections cannot resolve instance addresses without them."
            );
        }
    }

    let settings = parse_settings(&std::env::var("BROKER_SETTINGS").unwrap_or_default());
    let appstream_enabled = resolve_appstream_enabled(
        std::env::var("BROKER_APPSTREAM_ENABLED")
            .ok()
            .and_then(|v| parse_bool(&v)),
        &settings,
    )?;

    Ok(Config {
        port: std::env::var("BROKER_PORT")
            .unwrap_or_else(|_| "8443".into())
            .parse()
            .unwrap_or(8443),
        appstream_enabled,
        streaming_api_url: std::env::var("BROKER_STREAMING_API_URL")
            .unwrap_or_else(|_| "http://localhost:4000".into()),
        environment_api_url: std::env::var("BROKER_ENVIRONMENT_API_URL")
            .unwrap_or_else(|_| "http://localhost:4000".into()),
        api_key: std::env::var("BROKER_API_KEY").ok().filter(|k| !k.is_empty()),
        http_timeout_secs: std::env::var("BROKER_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30),
        http_max_retries: std::env::var("BROKER_HTTP_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3),
        aws,
        settings,
        log_json: std::env::var("BROKER_LOG_JSON")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(false),
    })
}

/// Accepts the usual spellings of a boolean env var.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The gateway flag may come from BROKER_APPSTREAM_ENABLED or from
/// BROKER_SETTINGS. Either source alone wins; two differing values are a
/// startup error.
pub fn resolve_appstream_enabled(
    explicit: Option<bool>,
    settings: &HashMap<String, bool>,
) -> anyhow::Result<bool> {
    match (explicit, settings.get(IS_APP_STREAM_ENABLED).copied()) {
        (Some(a), Some(b)) if a != b => anyhow::bail!(
            "BROKER_APPSTREAM_ENABLED={} conflicts with {}={} in BROKER_SETTINGS",
            a,
            IS_APP_STREAM_ENABLED,
            b
        ),
        (Some(v), _) | (None, Some(v)) => Ok(v),
        (None, None) => Ok(false),
    }
}

/// Split `key=value` pairs separated by commas. Entries without `=` or with
/// an empty key or value are skipped.
fn parse_pairs(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Parse `key=bool` pairs separated by commas. Malformed entries are skipped.
pub fn parse_settings(raw: &str) -> HashMap<String, bool> {
    parse_pairs(raw)
        .into_iter()
        .filter_map(|(key, value)| Some((key, parse_bool(&value)?)))
        .collect()
}
