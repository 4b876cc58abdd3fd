//! 订单领域模型
//!
//! 订单账本只追加，状态在本服务范围内创建后不再变化。

use chrono::{DateTime, Utc};
use orderflow_shared::events::OrderEvent;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 订单状态
///
/// 创建即为 `pending`；终态留给后续的履约流程。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
}

/// 订单账本记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Order {
    /// 由账本在插入时分配
    pub id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// 由已分配 ID 的订单构造订单创建事件
    pub fn to_event(&self) -> OrderEvent {
        OrderEvent {
            order_id: self.id,
            user_id: self.user_id,
            product_id: self.product_id,
            quantity: self.quantity,
        }
    }
}

/// 待插入的订单
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: i64,
    pub product_id: i64,
    pub quantity: i32,
}

/// 待分发的 outbox 记录
///
/// 与订单行在同一事务中写入；`published_at` 为空表示尚未被通道确认。
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OutboxRecord {
    pub id: i64,
    pub order_id: i64,
    pub topic: String,
    pub partition_key: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// 线上格式的消息体
    pub fn payload_bytes(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_to_event() {
        let order = Order {
            id: 9,
            user_id: 1,
            product_id: 123,
            quantity: 30,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };

        let event = order.to_event();
        assert_eq!(event.order_id, 9);
        assert_eq!(event.user_id, 1);
        assert_eq!(event.product_id, 123);
        assert_eq!(event.quantity, 30);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(OrderStatus::Pending).unwrap(),
            serde_json::json!("pending")
        );
    }

    #[test]
    fn test_outbox_payload_is_order_event() {
        let event = OrderEvent {
            order_id: 1,
            user_id: 2,
            product_id: 123,
            quantity: 3,
        };
        let record = OutboxRecord {
            id: 1,
            order_id: 1,
            topic: "order.created".into(),
            partition_key: "123".into(),
            event_type: "OrderCreated".into(),
            payload: serde_json::to_value(&event).unwrap(),
            attempts: 0,
            next_attempt_at: Utc::now(),
            last_error: None,
            published_at: None,
            created_at: Utc::now(),
        };

        let bytes = record.payload_bytes().unwrap();
        assert_eq!(OrderEvent::from_slice(&bytes).unwrap(), event);
    }
}
