pub mod environment;
pub mod http;
pub mod settings;
pub mod streaming;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{ConnectionDescriptor, RequestContext};

pub use settings::{Settings, StaticSettings};

/// Application the streaming gateway opens for web connections.
pub const BROWSER_APPLICATION: &str = "firefox";

/// Application the streaming gateway opens for SSH connections.
pub const TERMINAL_APPLICATION: &str = "terminal";

/// Login user passed to the terminal application for SSH sessions.
pub const SSH_LOGIN_USER: &str = "ec2-user";

/// Parameters for an application-based streaming session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingUrlRequest {
    pub environment_id: String,
    pub application_id: String,
    /// Opaque per-session parameters for the application, e.g. `"10.0.0.5,ec2-user"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_context: Option<String>,
}

/// Parameters for a remote desktop session against an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDesktopRequest {
    pub environment_id: String,
    pub instance_id: String,
}

/// Issues time-limited streaming URLs that front a target endpoint.
#[async_trait]
pub trait StreamingUrlProvider: Send + Sync {
    async fn get_streaming_url(
        &self,
        ctx: &RequestContext,
        request: StreamingUrlRequest,
    ) -> Result<String, AppError>;

    async fn url_for_remote_desktop(
        &self,
        ctx: &RequestContext,
        request: RemoteDesktopRequest,
    ) -> Result<String, AppError>;
}

/// Mints private (presigned) URLs for connections that are not directly addressable.
#[async_trait]
pub trait PrivateUrlResolver: Send + Sync {
    async fn create_private_url(
        &self,
        ctx: &RequestContext,
        environment_id: &str,
        connection: &ConnectionDescriptor,
    ) -> Result<String, AppError>;
}

/// Looks up compute instances in the environment's cloud account.
#[async_trait]
pub trait InstanceDirectory: Send + Sync {
    /// Private address of the instance's primary network interface.
    /// `Ok(None)` when the instance exists but has no interface address.
    async fn private_ip_address(
        &self,
        ctx: &RequestContext,
        environment_id: &str,
        instance_id: &str,
    ) -> Result<Option<String>, AppError>;
}
