//! HTTP 处理器

use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

use crate::dto::{CreateOrderRequest, CreateOrderResponse};
use crate::error::{OrderError, Result};
use crate::middleware::AuthenticatedUser;
use crate::models::Order;
use crate::state::AppState;

/// 创建订单
///
/// POST /orders
pub async fn create_order(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    payload: std::result::Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateOrderResponse>)> {
    let Json(req) = payload.map_err(|e| OrderError::Validation(e.body_text()))?;

    let order = state
        .order_service
        .create_order(user.user_id, req.product_id, req.quantity)
        .await?;

    Ok((StatusCode::CREATED, Json(CreateOrderResponse::from(&order))))
}

/// 查询订单
///
/// GET /orders/{order_id}
pub async fn get_order(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(order_id): Path<i64>,
) -> Result<Json<Order>> {
    let order = state.order_service.get_order(user.user_id, order_id).await?;
    Ok(Json(order))
}

/// 存活探针
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "order-service"
    }))
}
