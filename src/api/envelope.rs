//! Consistent response envelope for all API endpoints.
//!
//! Every response is `{ "success": bool, "data" | "error": ..., "executed_at": ... }`,
//! so clients branch on one field regardless of endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::error::CoreError;

/// Successful envelope: `{ "success": true, "data": T, "executed_at": ... }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    pub executed_at: String,
}

impl<T: Serialize> ApiResponse<T> {
    fn build(status: StatusCode, data: T) -> Response {
        let body = Self {
            success: true,
            data,
            executed_at: Utc::now().to_rfc3339(),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn ok(data: T) -> Response {
        Self::build(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Response {
        Self::build(StatusCode::CREATED, data)
    }
}

/// Error detail inside [`ApiErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error envelope: `{ "success": false, "error": { ... }, "executed_at": ... }`
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
    pub executed_at: String,
}

impl ApiErrorResponse {
    pub fn build(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
        let body = Self {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
                details: None,
            },
            executed_at: Utc::now().to_rfc3339(),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::NOT_FOUND, "not_found", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "validation_error", msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", msg)
    }

    /// Map a classified core error to its HTTP shape.
    pub fn from_core(err: &CoreError) -> Response {
        let status = match err {
            CoreError::NotFound(_) | CoreError::PluginNotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::ConfigInvalid { .. } | CoreError::UnresolvedReference { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            CoreError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CoreError::Cancelled => StatusCode::BAD_REQUEST,
            CoreError::PluginExecution { .. } | CoreError::OrphanedByRestart => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::build(status, err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ok_envelope_shape() {
        let resp = ApiResponse::ok(serde_json::json!({"hello": "world"}));
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["data"]["hello"], "world");
        assert!(v.get("executed_at").is_some());
    }

    #[tokio::test]
    async fn test_error_envelope_shape() {
        let resp = ApiErrorResponse::not_found("gone");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "not_found");
        assert_eq!(v["error"]["message"], "gone");
    }

    #[tokio::test]
    async fn test_core_error_status_mapping() {
        let resp = ApiErrorResponse::from_core(&CoreError::StorageUnavailable("disk".into()));
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = ApiErrorResponse::from_core(&CoreError::Validation("bad".into()));
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = ApiErrorResponse::from_core(&CoreError::PluginNotFound("Input.x".into()));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
