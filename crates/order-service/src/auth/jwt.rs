//! JWT Token 校验
//!
//! HS256 签名，载荷至少包含 `user_id` 与 `exp`。
//! 签名密钥通过 `JwtConfig` 显式传入，由进程启动上下文持有。

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use orderflow_shared::config::AuthConfig;
use serde::{Deserialize, Serialize};

use super::TokenValidator;
use crate::error::OrderError;

/// JWT 配置
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// 签名密钥
    pub secret: String,
    /// 非空时要求 Token 的 iss 与之一致
    pub issuer: Option<String>,
}

impl From<&AuthConfig> for JwtConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            issuer: config.issuer.clone(),
        }
    }
}

/// JWT Claims（Token 载荷）
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: i64,
    /// 过期时间（Unix 秒）
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// JWT 校验器
#[derive(Clone)]
pub struct JwtValidator {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtValidator {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 签发 Token
    ///
    /// 线上由认证服务签发，这里供运维工具和测试使用。
    pub fn generate_token(&self, user_id: i64, expires_in: Duration) -> Result<String, OrderError> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            exp: (now + expires_in).timestamp(),
            iat: Some(now.timestamp()),
            iss: self.config.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| OrderError::Internal(format!("JWT 生成失败: {}", e)))
    }

    /// 验证并解析 Token
    pub fn verify_token(&self, token: &str) -> Result<Claims, OrderError> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    OrderError::Unauthorized("Token 已过期".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    OrderError::Unauthorized("无效的 Token".to_string())
                }
                _ => OrderError::Unauthorized(format!("Token 验证失败: {}", e)),
            },
        )?;

        Ok(token_data.claims)
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<i64, OrderError> {
        self.verify_token(token).map(|claims| claims.user_id)
    }
}
