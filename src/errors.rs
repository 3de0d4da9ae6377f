use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("connection with scheme '{scheme}' requires an instance id")]
    MissingInstanceId { scheme: String },

    #[error("instance {instance_id} has no private network address")]
    NoPrivateAddress { instance_id: String },

    #[error("{service} request failed: {message}")]
    Upstream { service: &'static str, message: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        AppError::Upstream {
            service,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "invalid or missing api key".to_string(),
            ),
            AppError::InvalidRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
                reason.clone(),
            ),
            AppError::MissingInstanceId { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "missing_instance_id",
                self.to_string(),
            ),
            AppError::NoPrivateAddress { .. } => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "no_private_address",
                self.to_string(),
            ),
            AppError::Upstream { service, message } => {
                tracing::warn!(service, "upstream error: {}", message);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "upstream_failed",
                    self.to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
