//! HTTP 处理器
//!
//! 库存查询与入库。入库只在商品不存在时生效，已有库存不会被覆盖。

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{InventoryError, Result};
use crate::models::Stock;
use crate::state::AppState;

/// 入库请求
#[derive(Debug, Deserialize)]
pub struct EnsureStockRequest {
    pub product_id: i64,
    pub quantity: i32,
}

/// 库存视图
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockResponse {
    pub product_id: i64,
    pub quantity: i32,
}

impl From<Stock> for StockResponse {
    fn from(stock: Stock) -> Self {
        Self {
            product_id: stock.product_id,
            quantity: stock.quantity,
        }
    }
}

/// 查询库存
///
/// GET /stock/{product_id}
pub async fn get_stock(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
) -> Result<Json<StockResponse>> {
    let stock = state
        .stock
        .get(product_id)
        .await?
        .ok_or(InventoryError::StockNotFound(product_id))?;

    Ok(Json(stock.into()))
}

/// 商品入库，返回入库后的当前库存
///
/// POST /admin/stock
pub async fn ensure_stock(
    State(state): State<AppState>,
    payload: std::result::Result<Json<EnsureStockRequest>, JsonRejection>,
) -> Result<Json<StockResponse>> {
    let Json(req) = payload.map_err(|e| InventoryError::Validation(e.body_text()))?;

    state.stock.ensure(req.product_id, req.quantity).await?;
    let stock = state
        .stock
        .get(req.product_id)
        .await?
        .ok_or_else(|| InventoryError::Internal(format!("入库后未找到商品: {}", req.product_id)))?;

    info!(product_id = stock.product_id, quantity = stock.quantity, "商品库存已就绪");
    Ok(Json(stock.into()))
}

/// 存活探针
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "inventory-service"
    }))
}
