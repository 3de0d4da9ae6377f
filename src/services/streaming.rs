//! Client for the streaming gateway's URL-issuing API.
//!
//! - `POST /api/appstream/environments/{envId}/streaming-url`: application session
//! - `POST /api/appstream/environments/{envId}/remote-desktop-url`: RDP session
//!
//! Both answer `{"url": "..."}` with a time-limited streaming URL.

use async_trait::async_trait;
use serde::Serialize;

use super::http::{join_url, ServiceClient};
use super::{RemoteDesktopRequest, StreamingUrlProvider, StreamingUrlRequest};
use crate::errors::AppError;
use crate::models::RequestContext;

const SERVICE: &str = "streaming";

pub struct HttpStreamingUrlProvider {
    base_url: String,
    http: ServiceClient,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationBody<'a> {
    application_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_context: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoteDesktopBody<'a> {
    instance_id: &'a str,
}

impl HttpStreamingUrlProvider {
    pub fn new(base_url: impl Into<String>, http: ServiceClient) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }

    fn endpoint(&self, environment_id: &str, leaf: &str) -> String {
        join_url(
            &self.base_url,
            &format!(
                "api/appstream/environments/{}/{}",
                urlencoding::encode(environment_id),
                leaf
            ),
        )
    }
}

#[async_trait]
impl StreamingUrlProvider for HttpStreamingUrlProvider {
    async fn get_streaming_url(
        &self,
        ctx: &RequestContext,
        request: StreamingUrlRequest,
    ) -> Result<String, AppError> {
        let url = self.endpoint(&request.environment_id, "streaming-url");
        let body = ApplicationBody {
            application_id: &request.application_id,
            session_context: request.session_context.as_deref(),
        };
        self.http.post_for_url(SERVICE, &url, ctx, &body).await
    }

    async fn url_for_remote_desktop(
        &self,
        ctx: &RequestContext,
        request: RemoteDesktopRequest,
    ) -> Result<String, AppError> {
        let url = self.endpoint(&request.environment_id, "remote-desktop-url");
        let body = RemoteDesktopBody {
            instance_id: &request.instance_id,
        };
        self.http.post_for_url(SERVICE, &url, ctx, &body).await
    }
}
