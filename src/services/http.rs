/// HTTP client shared by the collaborator services.
/// Uses reqwest-middleware for retries on transient failures.
use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::RequestContext;

#[derive(Clone)]
pub struct ServiceClient {
    client: ClientWithMiddleware,
}

/// Every collaborator answers a URL request with `{"url": "..."}`.
#[derive(Debug, Deserialize)]
struct UrlResponse {
    url: String,
}

impl ServiceClient {
    pub fn new(timeout: Duration, max_retries: u32) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout) // Total timeout including retries
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let client = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { client })
    }

    pub fn from_config(cfg: &crate::config::Config) -> anyhow::Result<Self> {
        Self::new(
            Duration::from_secs(cfg.http_timeout_secs),
            cfg.http_max_retries,
        )
    }

    /// POST `body` as JSON on behalf of the caller in `ctx` and return the
    /// `url` field of the response. An empty `url` is returned as-is; callers
    /// treat it as no URL.
    pub async fn post_for_url<B: Serialize + ?Sized>(
        &self,
        service: &'static str,
        url: &str,
        ctx: &RequestContext,
        body: &B,
    ) -> Result<String, AppError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to encode {} request: {}", service, e)))?;

        let mut req = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header("x-request-id", ctx.request_id.as_str());

        if let Some(token) = &ctx.bearer_token {
            req = req.header(reqwest::header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(principal) = &ctx.principal_id {
            req = req.header("x-principal-id", principal.as_str());
        }

        let resp = req.body(payload).send().await.map_err(|e| {
            tracing::warn!("{} request failed after retries: {}", service, e);
            AppError::upstream(service, e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::upstream(
                service,
                format!("status={}, body={}", status, body.chars().take(200).collect::<String>()),
            ));
        }

        let parsed: UrlResponse = resp
            .json()
            .await
            .map_err(|e| AppError::upstream(service, format!("invalid response: {}", e)))?;

        Ok(parsed.url)
    }
}

impl ServiceClient {
    /// POST a pre-built body with caller-supplied headers and return the
    /// status and text body. Transport failures become upstream errors;
    /// status handling is left to the caller.
    pub async fn post_raw(
        &self,
        service: &'static str,
        url: &str,
        headers: reqwest::header::HeaderMap,
        body: Vec<u8>,
    ) -> Result<(reqwest::StatusCode, String), AppError> {
        let resp = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("{} request failed after retries: {}", service, e);
                AppError::upstream(service, e.to_string())
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AppError::upstream(service, format!("failed to read response: {}", e)))?;
        Ok((status, text))
    }
}

/// Join a base URL and a path without doubling the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
