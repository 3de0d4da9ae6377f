//! Routes connections through the streaming gateway.
//!
//! When the gateway is enabled, the direct URL of a web, SSH or RDP
//! connection is replaced with a streaming URL so the target is only ever
//! reached from inside a streamed application session. The original target
//! is kept in `appstreamDestinationUrl`.

use std::sync::Arc;

use async_trait::async_trait;

use super::ConnectionUrlPlugin;
use crate::errors::AppError;
use crate::models::{ConnectionDescriptor, RewriteContext, Scheme};
use crate::services::settings::IS_APP_STREAM_ENABLED;
use crate::services::{
    InstanceDirectory, PrivateUrlResolver, RemoteDesktopRequest, Settings, StreamingUrlProvider,
    StreamingUrlRequest, BROWSER_APPLICATION, SSH_LOGIN_USER, TERMINAL_APPLICATION,
};

pub struct ConnectionUrlRewriter {
    settings: Arc<dyn Settings>,
    private_urls: Arc<dyn PrivateUrlResolver>,
    instances: Arc<dyn InstanceDirectory>,
    streaming: Arc<dyn StreamingUrlProvider>,
}

impl ConnectionUrlRewriter {
    pub fn new(
        settings: Arc<dyn Settings>,
        private_urls: Arc<dyn PrivateUrlResolver>,
        instances: Arc<dyn InstanceDirectory>,
        streaming: Arc<dyn StreamingUrlProvider>,
    ) -> Self {
        Self {
            settings,
            private_urls,
            instances,
            streaming,
        }
    }

    /// Return `connection` with its URL swapped for a streaming URL where
    /// the gateway applies, or unchanged where it does not.
    ///
    /// Not idempotent: a connection that already carries a streaming URL is
    /// wrapped again.
    pub async fn rewrite(
        &self,
        ctx: &RewriteContext,
        connection: ConnectionDescriptor,
    ) -> Result<ConnectionDescriptor, AppError> {
        // Listing runs the same pipeline; only URL creation may mint sessions.
        if !self.settings.get_boolean(IS_APP_STREAM_ENABLED) || connection.is_listing() {
            return Ok(connection);
        }

        let mut connection = connection;
        if connection.is_sagemaker() {
            let private_url = self
                .private_urls
                .create_private_url(&ctx.request, &ctx.environment_id, &connection)
                .await?;
            connection.url = Some(private_url);
        }

        let streaming_url = match connection.scheme() {
            Scheme::Http if connection.has_url() => {
                tracing::debug!(
                    env_id = %ctx.environment_id,
                    connection_id = ?connection.id(),
                    "Target connection URL {} will be accessible via AppStream URL",
                    connection.url.as_deref().unwrap_or_default()
                );
                let url = self
                    .streaming
                    .get_streaming_url(
                        &ctx.request,
                        StreamingUrlRequest {
                            environment_id: ctx.environment_id.clone(),
                            application_id: BROWSER_APPLICATION.to_string(),
                            session_context: None,
                        },
                    )
                    .await?;
                Some(url)
            }
            Scheme::Ssh => Some(self.terminal_url(ctx, &connection).await?),
            Scheme::Rdp => {
                let instance_id = require_instance_id(&connection)?;
                tracing::debug!(
                    env_id = %ctx.environment_id,
                    "Will stream target RDP connection for instance {} via AppStream",
                    instance_id
                );
                let url = self
                    .streaming
                    .url_for_remote_desktop(
                        &ctx.request,
                        RemoteDesktopRequest {
                            environment_id: ctx.environment_id.clone(),
                            instance_id: instance_id.to_string(),
                        },
                    )
                    .await?;
                Some(url)
            }
            Scheme::Http | Scheme::Unknown => None,
        };

        // An empty streaming URL counts as none obtained
        Ok(match streaming_url.filter(|url| !url.is_empty()) {
            Some(url) => {
                let connection = connection.into_streamed(url);
                tracing::debug!(
                    env_id = %ctx.environment_id,
                    connection_id = ?connection.id(),
                    "Modified connection to use AppStream streaming URL {}",
                    connection.url.as_deref().unwrap_or_default()
                );
                connection
            }
            None => connection,
        })
    }

    async fn terminal_url(
        &self,
        ctx: &RewriteContext,
        connection: &ConnectionDescriptor,
    ) -> Result<String, AppError> {
        let instance_id = require_instance_id(connection)?;
        tracing::debug!(
            env_id = %ctx.environment_id,
            "Target instance {} will be available for SSH connection via AppStream URL",
            instance_id
        );

        let private_ip = self
            .instances
            .private_ip_address(&ctx.request, &ctx.environment_id, instance_id)
            .await?
            .ok_or_else(|| AppError::NoPrivateAddress {
                instance_id: instance_id.to_string(),
            })?;

        self.streaming
            .get_streaming_url(
                &ctx.request,
                StreamingUrlRequest {
                    environment_id: ctx.environment_id.clone(),
                    application_id: TERMINAL_APPLICATION.to_string(),
                    session_context: Some(ssh_session_context(&private_ip)),
                },
            )
            .await
    }
}

/// Session context the terminal application expects: `"<ip>,<login user>"`.
pub fn ssh_session_context(private_ip: &str) -> String {
    format!("{},{}", private_ip, SSH_LOGIN_USER)
}

fn require_instance_id(connection: &ConnectionDescriptor) -> Result<&str, AppError> {
    connection
        .instance_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::MissingInstanceId {
            scheme: connection.scheme.clone().unwrap_or_default(),
        })
}

#[async_trait]
impl ConnectionUrlPlugin for ConnectionUrlRewriter {
    fn name(&self) -> &'static str {
        "streaming-url"
    }

    async fn create_connection_url(
        &self,
        ctx: &RewriteContext,
        connection: ConnectionDescriptor,
    ) -> Result<ConnectionDescriptor, AppError> {
        self.rewrite(ctx, connection).await
    }
}
