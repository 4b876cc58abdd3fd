//! 库存服务错误类型定义

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orderflow_shared::error::OrderflowError;
use serde_json::json;

/// 库存服务错误类型
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("商品库存不存在: {0}")]
    StockNotFound(i64),

    /// 库存账本不可用，消费端据此延迟重投
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Shared(#[from] OrderflowError),

    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, InventoryError>;

impl InventoryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::StockNotFound(_) => StatusCode::NOT_FOUND,
            Self::Shared(OrderflowError::Validation(_)) => StatusCode::BAD_REQUEST,
            Self::Database(_) | Self::Shared(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::StockNotFound(_) => "STOCK_NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Shared(e) => e.code(),
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for InventoryError {
    fn into_response(self) -> Response {
        let status = self.status_code();

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            InventoryError::StockNotFound(1).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            InventoryError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            InventoryError::Database(sqlx::Error::PoolTimedOut).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(InventoryError::StockNotFound(1).error_code(), "STOCK_NOT_FOUND");
        assert_eq!(
            InventoryError::Shared(OrderflowError::Kafka("x".into())).error_code(),
            "KAFKA_ERROR"
        );
    }
}
