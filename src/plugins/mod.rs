//! Connection URL pipeline.
//!
//! A connection passes through every registered plugin in order when its
//! URL is created (and when connections are listed, with
//! `operation = "list"`). Each plugin receives the previous plugin's output;
//! the first error aborts the pipeline and nothing partial is returned.

pub mod streaming_url;

use std::sync::Arc;

use async_trait::async_trait;

use crate::aws::Ec2InstanceDirectory;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{ConnectionDescriptor, RewriteContext};
use crate::services::environment::HttpPrivateUrlResolver;
use crate::services::http::ServiceClient;
use crate::services::streaming::HttpStreamingUrlProvider;
use crate::services::Settings;

pub use streaming_url::ConnectionUrlRewriter;

/// The production pipeline: the streaming-URL rewriter wired to the HTTP
/// and EC2 clients described by `cfg`.
pub fn default_pipeline(
    cfg: &Config,
    settings: Arc<dyn Settings>,
) -> anyhow::Result<ConnectionUrlPipeline> {
    let http = ServiceClient::from_config(cfg)?;

    let rewriter = ConnectionUrlRewriter::new(
        settings,
        Arc::new(HttpPrivateUrlResolver::new(cfg.environment_api_url.clone(), http.clone())),
        Arc::new(Ec2InstanceDirectory::from_config(&cfg.aws, http.clone())),
        Arc::new(HttpStreamingUrlProvider::new(cfg.streaming_api_url.clone(), http)),
    );

    Ok(ConnectionUrlPipeline::new().with(Arc::new(rewriter)))
}

#[async_trait]
pub trait ConnectionUrlPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_connection_url(
        &self,
        ctx: &RewriteContext,
        connection: ConnectionDescriptor,
    ) -> Result<ConnectionDescriptor, AppError>;
}

#[derive(Clone, Default)]
pub struct ConnectionUrlPipeline {
    plugins: Vec<Arc<dyn ConnectionUrlPlugin>>,
}

impl ConnectionUrlPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, plugin: Arc<dyn ConnectionUrlPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub async fn create_connection_url(
        &self,
        ctx: &RewriteContext,
        connection: ConnectionDescriptor,
    ) -> Result<ConnectionDescriptor, AppError> {
        let mut connection = connection;
        for plugin in &self.plugins {
            tracing::trace!(plugin = plugin.name(), env_id = %ctx.environment_id, "running connection plugin");
            connection = plugin.create_connection_url(ctx, connection).await?;
        }
        Ok(connection)
    }
}
