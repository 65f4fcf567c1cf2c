use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use shiftfill_core::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度错误: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("未找到资源")]
    NotFound,

    #[error("请求冲突: {0}")]
    Conflict(String),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("服务繁忙: {0}")]
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error_type) = match &self {
            ApiError::Dispatch(DispatchError::GapNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("班次 {} 不存在", id),
                "GAP_NOT_FOUND",
            ),
            ApiError::Dispatch(err) if err.is_retryable() => (
                StatusCode::BAD_GATEWAY,
                format!("外部系统暂时不可用: {}", err),
                "UPSTREAM_UNAVAILABLE",
            ),
            ApiError::Dispatch(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("系统内部错误: {}", err),
                "INTERNAL_ERROR",
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "请求的资源不存在".to_string(),
                "NOT_FOUND",
            ),
            ApiError::Conflict(msg) => (
                StatusCode::CONFLICT,
                format!("资源冲突: {}", msg),
                "CONFLICT",
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {}", msg),
                "BAD_REQUEST",
            ),
            ApiError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("服务繁忙: {}", msg),
                "UNAVAILABLE",
            ),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
