//! API 错误到 HTTP 状态码的映射

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::utils::{StoreError, SyncError, TokenError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("未授权")]
    Unauthorized,

    #[error("权限不足")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized | ApiError::Token(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Invalid(_)) => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // 新配置已落盘, 只是守护进程没有重载
            ApiError::Sync(SyncError::Reload(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Sync(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "请求处理失败");
        }
        (
            status,
            Json(json!({
                "ret": 0,
                "msg": self.to_string(),
            })),
        )
            .into_response()
    }
}
