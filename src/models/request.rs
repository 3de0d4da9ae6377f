/// Identity of the caller on whose behalf a connection is being created.
///
/// The broker never interprets it; it is forwarded to collaborators so they
/// can authorize the call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub principal_id: Option<String>,
    pub bearer_token: Option<String>,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(principal_id: Option<String>, bearer_token: Option<String>) -> Self {
        Self {
            principal_id,
            bearer_token,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Per-request inputs that are not carried on the connection itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteContext {
    pub environment_id: String,
    pub request: RequestContext,
}

impl RewriteContext {
    pub fn new(environment_id: impl Into<String>, request: RequestContext) -> Self {
        Self {
            environment_id: environment_id.into(),
            request,
        }
    }
}
