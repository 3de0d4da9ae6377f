//! Client for the environment connection service, which mints private
//! (presigned) URLs for SageMaker notebook connections.

use async_trait::async_trait;

use super::http::{join_url, ServiceClient};
use super::PrivateUrlResolver;
use crate::errors::AppError;
use crate::models::{ConnectionDescriptor, RequestContext};

const SERVICE: &str = "environment";

pub struct HttpPrivateUrlResolver {
    base_url: String,
    http: ServiceClient,
}

impl HttpPrivateUrlResolver {
    pub fn new(base_url: impl Into<String>, http: ServiceClient) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }
}

#[async_trait]
impl PrivateUrlResolver for HttpPrivateUrlResolver {
    async fn create_private_url(
        &self,
        ctx: &RequestContext,
        environment_id: &str,
        connection: &ConnectionDescriptor,
    ) -> Result<String, AppError> {
        let url = join_url(
            &self.base_url,
            &format!(
                "api/workspaces/service-catalog/{}/connections/private-url",
                urlencoding::encode(environment_id)
            ),
        );
        tracing::debug!(environment_id, connection_id = ?connection.id(), "Requesting private URL");
        self.http.post_for_url(SERVICE, &url, ctx, connection).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_private_url_posts_connection() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/workspaces/service-catalog/env-9/connections/private-url"))
            .and(body_partial_json(json!({ "id": "c-1", "type": "sagemaker" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "url": "https://nb.presigned/x" })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let resolver = HttpPrivateUrlResolver::new(
            mock_server.uri(),
            ServiceClient::new(Duration::from_secs(5), 0).unwrap(),
        );
        let conn: ConnectionDescriptor =
            serde_json::from_value(json!({ "id": "c-1", "type": "sagemaker" })).unwrap();

        let url = resolver
            .create_private_url(&RequestContext::default(), "env-9", &conn)
            .await
            .unwrap();

        assert_eq!(url, "https://nb.presigned/x");
    }

    #[tokio::test]
    async fn test_private_url_failure_propagates() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let resolver = HttpPrivateUrlResolver::new(
            mock_server.uri(),
            ServiceClient::new(Duration::from_secs(5), 0).unwrap(),
        );

        let err = resolver
            .create_private_url(&RequestContext::default(), "env-9", &ConnectionDescriptor::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Upstream { service: "environment", .. }));
    }
}
