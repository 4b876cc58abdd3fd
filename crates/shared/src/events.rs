//! 订单事件线上格式
//!
//! 订单服务与库存服务之间唯一的契约。两个服务独立部署，
//! 只通过这里定义的扁平 JSON 记录和 topic 名称互相认识。

use serde::{Deserialize, Serialize};

use crate::error::OrderflowError;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 集中管理 Kafka topic 名称，防止两个服务各写一份导致拼写不一致
pub mod topics {
    pub const ORDER_CREATED: &str = "order.created";
}

/// 事件类型，写入 outbox 记录的 `event_type` 列
pub const ORDER_CREATED_EVENT_TYPE: &str = "OrderCreated";

// ---------------------------------------------------------------------------
// OrderEvent
// ---------------------------------------------------------------------------

/// 订单创建事件
///
/// 每条订单记录成功落库后产生一条；消费端可能收到一次或多次（至少一次投递）。
/// 记录本身不带序列号，`order_id` 是唯一可用作幂等键的字段。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub order_id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
}

impl OrderEvent {
    /// 分区键：同一商品的事件落在同一分区内，按顺序消费
    pub fn partition_key(&self) -> String {
        self.product_id.to_string()
    }

    /// 业务层面的合法性校验
    ///
    /// JSON 结构正确但数量非正的事件无法被任何重试修复，按坏消息处理。
    pub fn validate(&self) -> Result<(), OrderflowError> {
        if self.quantity <= 0 {
            return Err(OrderflowError::Validation(format!(
                "订单事件数量必须为正数: order_id={}, quantity={}",
                self.order_id, self.quantity
            )));
        }
        Ok(())
    }

    /// 序列化为线上格式
    pub fn to_bytes(&self) -> Result<Vec<u8>, OrderflowError> {
        serde_json::to_vec(self).map_err(|e| OrderflowError::Serialization(e.to_string()))
    }

    /// 从线上格式解析
    pub fn from_slice(payload: &[u8]) -> Result<Self, OrderflowError> {
        serde_json::from_slice(payload).map_err(|e| OrderflowError::Serialization(e.to_string()))
    }
}
