//! 仓储 Trait 定义

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{NewOrder, Order, OutboxRecord};

/// 订单账本接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 插入订单，状态为 pending，ID 与创建时间由账本分配
    async fn create(&self, order: &NewOrder) -> Result<Order>;

    /// 在同一事务中插入订单及其待发布事件
    async fn create_with_event(&self, order: &NewOrder, topic: &str) -> Result<Order>;

    async fn get(&self, id: i64) -> Result<Option<Order>>;
}

/// outbox 仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxRepositoryTrait: Send + Sync {
    /// 领取到期的未发布记录并为其加上租约
    ///
    /// 租约期内其他分发器实例不会再领取同一记录；
    /// 分发器崩溃后租约到期，记录自动重新可见。
    async fn claim_batch(&self, limit: i64, lease: Duration) -> Result<Vec<OutboxRecord>>;

    /// 标记记录已被通道确认
    async fn mark_published(&self, id: i64) -> Result<()>;

    /// 发布失败，记录错误并安排下次尝试时间
    async fn release(&self, id: i64, error: &str, retry_at: DateTime<Utc>) -> Result<()>;
}
