use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Connection `type` that needs a private URL minted before it can be streamed.
pub const SAGEMAKER_TYPE: &str = "sagemaker";

/// Connection `operation` used while connections are being enumerated.
pub const LIST_OPERATION: &str = "list";

/// Transport family of a connection, normalized from the raw `scheme` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `http`, `https`, or no scheme at all.
    Http,
    Ssh,
    /// `rdp` or `customrdp`.
    Rdp,
    Unknown,
}

impl Scheme {
    pub fn classify(raw: Option<&str>) -> Self {
        let normalized = raw.unwrap_or_default().trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" | "http" | "https" => Scheme::Http,
            "ssh" => Scheme::Ssh,
            "rdp" | "customrdp" => Scheme::Rdp,
            _ => Scheme::Unknown,
        }
    }
}

/// A workspace connection as exchanged with the connection pipeline.
///
/// Only the fields the broker inspects are typed; everything else the
/// caller sends (`id`, `name`, `role`, `info`, ...) rides along in `extra`
/// and is serialized back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// The direct target URL, kept after `url` has been swapped for a streaming URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appstream_destination_url: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ConnectionDescriptor {
    pub fn scheme(&self) -> Scheme {
        Scheme::classify(self.scheme.as_deref())
    }

    pub fn is_listing(&self) -> bool {
        self.operation.as_deref() == Some(LIST_OPERATION)
    }

    pub fn is_sagemaker(&self) -> bool {
        self.kind
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case(SAGEMAKER_TYPE))
            .unwrap_or(false)
    }

    /// True when `url` is set to a non-empty value.
    pub fn has_url(&self) -> bool {
        self.url.as_deref().map(|u| !u.is_empty()).unwrap_or(false)
    }

    /// Caller-supplied connection id, if any.
    pub fn id(&self) -> Option<&str> {
        self.extra.get("id").and_then(Value::as_str)
    }

    /// Swap `url` for `streaming_url`, keeping the previous target in
    /// `appstream_destination_url`.
    pub fn into_streamed(mut self, streaming_url: String) -> Self {
        self.appstream_destination_url = self.url.take();
        self.url = Some(streaming_url);
        self
    }
}

/// Body returned by the connection URL endpoint and the `rewrite` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUrlResponse {
    pub env_id: String,
    pub connection: ConnectionDescriptor,
}
