use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::plugins::ConnectionUrlPipeline;

pub mod handlers;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub pipeline: ConnectionUrlPipeline,
    /// Required in `X-Api-Key` when set.
    pub api_key: Option<String>,
}

/// Build the full application router: health checks plus the API under `/api/v1`.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .nest("/api/v1", api_router(state.clone()))
        .fallback(fallback_404)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
}

/// Connection API router. Routes are relative; the caller mounts it under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/environments/:env_id/connections/url",
            post(handlers::create_connection_url),
        )
        .layer(middleware::from_fn_with_state(state, api_auth))
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn readiness_check() -> &'static str {
    "ok"
}

/// Middleware: validates `X-Api-Key` against the configured key.
/// The API is open when no key is configured.
async fn api_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    match provided {
        Some(k) if k == expected => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("api: invalid key (provided: '{}')", masked);
            Err(AppError::Unauthorized)
        }
        None => {
            tracing::warn!("api: missing X-Api-Key header");
            Err(AppError::Unauthorized)
        }
    }
}

/// Middleware: makes sure every request carries an `x-request-id` (keeping
/// the caller's if present) and echoes it on the response.
async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let req_id = match req.headers().get("x-request-id") {
        Some(v) if !v.is_empty() => v.clone(),
        _ => {
            let generated = HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
            req.headers_mut().insert("x-request-id", generated.clone());
            generated
        }
    };

    let mut resp = next.run(req).await;
    resp.headers_mut().insert("x-request-id", req_id);
    resp
}

/// Middleware: injects security headers into every response.
/// Responses may carry streaming URLs and must not be cached.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}
