//! 身份校验
//!
//! 下单流程只依赖 `TokenValidator` 契约：给定 Bearer Token，返回用户 ID 或拒绝。
//! 签发与注册由独立的认证服务负责。

mod jwt;

pub use jwt::{Claims, JwtConfig, JwtValidator};

use crate::error::OrderError;

/// Bearer Token 校验契约
#[cfg_attr(test, mockall::automock)]
pub trait TokenValidator: Send + Sync {
    /// 校验 Token，成功时返回用户 ID
    fn validate(&self, token: &str) -> Result<i64, OrderError>;
}
