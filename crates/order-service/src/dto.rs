//! 请求与响应体

use serde::{Deserialize, Serialize};

use crate::models::{Order, OrderStatus};

/// 下单请求（用户身份来自 Bearer Token）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateOrderRequest {
    pub product_id: i64,
    pub quantity: i32,
}

/// 下单响应
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CreateOrderResponse {
    pub order_id: i64,
    pub status: OrderStatus,
}

impl From<&Order> for CreateOrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
        }
    }
}
