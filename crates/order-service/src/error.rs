//! 订单服务错误类型定义

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orderflow_shared::error::OrderflowError;
use serde_json::json;

/// 订单服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    /// 调用方可修正的参数错误，在触达存储之前返回
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("未授权: {0}")]
    Unauthorized(String),

    #[error("订单不存在: {0}")]
    NotFound(i64),

    /// 订单账本不可用或约束冲突，不做透明重试
    #[error("订单持久化失败: {0}")]
    Persistence(#[from] sqlx::Error),

    /// 事件通道发布失败
    #[error("事件发布失败: {0}")]
    Channel(String),

    #[error(transparent)]
    Shared(#[from] OrderflowError),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OrderError>;

impl OrderError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Shared(e) => match e {
                OrderflowError::Validation(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Persistence(_) | Self::Channel(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NotFound(_) => "ORDER_NOT_FOUND",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Channel(_) => "CHANNEL_ERROR",
            Self::Shared(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, code = self.error_code(), "请求处理失败");
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": null
        });

        (status, axum::Json(body)).into_response()
    }
}
