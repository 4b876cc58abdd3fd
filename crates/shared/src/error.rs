//! 统一错误处理模块
//!
//! 定义两个服务共享的基础设施错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum OrderflowError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("序列化失败: {0}")]
    Serialization(String),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 通用错误 ====================
    #[error("配置错误: {0}")]
    Config(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, OrderflowError>;

impl OrderflowError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<config::ConfigError> for OrderflowError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
