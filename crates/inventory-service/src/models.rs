//! 库存领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 库存账本记录
///
/// 数量始终非负，由条件扣减保证。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Stock {
    pub product_id: i64,
    pub quantity: i32,
    pub updated_at: DateTime<Utc>,
}

/// 条件扣减结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecrementOutcome {
    /// 已扣减
    Applied,
    /// 库存不足或商品未入库，库存未变化
    InsufficientStock,
    /// 该订单此前已对账，本次不做任何变更
    AlreadyApplied,
}

impl DecrementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::InsufficientStock => "insufficient_stock",
            Self::AlreadyApplied => "already_applied",
        }
    }
}

/// 已对账订单的记录结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Applied,
    InsufficientStock,
}
