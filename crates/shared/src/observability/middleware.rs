//! HTTP 中间件
//!
//! 两个中间件配合使用时 `request_id` 必须在外层，`http_tracing` 才能把请求 ID
//! 记到 span 上：
//!
//! ```ignore
//! let app = routes::router(state)
//!     .layer(middleware::from_fn(http_tracing))
//!     .layer(middleware::from_fn(request_id));
//! ```

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, field};

use super::metrics;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// 请求 ID，存放在请求扩展中
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 为每个请求建立 span 并记录请求量与耗时
///
/// 指标按路由模板打标签（`/stock/{product_id}`），避免按具体 ID 膨胀。
pub async fn http_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let span = tracing::info_span!(
        "http_request",
        %method,
        route = %route,
        request_id = %request_id,
        status = field::Empty,
        latency_ms = field::Empty,
    );

    let started = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    let elapsed = started.elapsed();
    let status = response.status().as_u16();

    span.record("status", status);
    span.record("latency_ms", elapsed.as_millis() as u64);
    metrics::record_http_request(method.as_str(), &route, status, elapsed.as_secs_f64());

    response
}

/// 沿用调用方的 `x-request-id`，没有则生成，并回写到响应头
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
