//! Bearer Token 认证中间件
//!
//! 校验 `Authorization: Bearer <token>`，成功后将用户身份注入请求扩展。

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::OrderError;
use crate::state::AppState;

/// 已认证用户
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
}

/// 认证中间件
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = match bearer_token(&request) {
        Some(token) => token,
        None => {
            return OrderError::Unauthorized("缺少或格式错误的认证 Token".to_string())
                .into_response();
        }
    };

    match state.token_validator.validate(token) {
        Ok(user_id) => {
            request
                .extensions_mut()
                .insert(AuthenticatedUser { user_id });
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "Token 校验失败");
            e.into_response()
        }
    }
}

/// 提取 Bearer Token
///
/// 只接受 `Bearer <token>` 两段格式。
fn bearer_token(request: &Request<Body>) -> Option<&str> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;

    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}
