use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use crate::errors::AppError;
use crate::models::{ConnectionDescriptor, ConnectionUrlResponse, RequestContext, RewriteContext};

use super::AppState;

/// Build the caller's request context from the inbound headers.
///
/// `Authorization: Bearer` is the caller's own token and is forwarded to
/// collaborators as-is.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    let bearer_token = header("authorization")
        .and_then(|v| v.strip_prefix("Bearer ").map(|t| t.trim().to_string()));

    let ctx = RequestContext::new(header("x-principal-id"), bearer_token);
    match header("x-request-id") {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    }
}

// ── Handlers ─────────────────────────────────────────────────

/// `POST /environments/:env_id/connections/url`
pub async fn create_connection_url(
    State(state): State<Arc<AppState>>,
    Path(env_id): Path<String>,
    headers: HeaderMap,
    Json(connection): Json<ConnectionDescriptor>,
) -> Result<Json<ConnectionUrlResponse>, AppError> {
    if env_id.trim().is_empty() {
        return Err(AppError::InvalidRequest("environment id is required".into()));
    }

    let ctx = RewriteContext::new(env_id, request_context(&headers));
    tracing::debug!(
        env_id = %ctx.environment_id,
        request_id = %ctx.request.request_id,
        scheme = ?connection.scheme,
        "creating connection url"
    );

    let connection = state.pipeline.create_connection_url(&ctx, connection).await?;

    Ok(Json(ConnectionUrlResponse {
        env_id: ctx.environment_id,
        connection,
    }))
}
