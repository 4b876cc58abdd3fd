//! 内存订单仓储
//!
//! 与 PostgreSQL 实现语义一致的进程内账本，用于本地演练和跨服务的端到端测试。
//! 订单与 outbox 共用一把锁，`create_with_event` 因此是原子的。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use orderflow_shared::events::ORDER_CREATED_EVENT_TYPE;
use parking_lot::Mutex;

use super::traits::{OrderRepositoryTrait, OutboxRepositoryTrait};
use crate::error::{OrderError, Result};
use crate::models::{NewOrder, Order, OrderStatus, OutboxRecord};

#[derive(Default)]
struct LedgerState {
    orders: Vec<Order>,
    outbox: Vec<OutboxRecord>,
    next_order_id: i64,
    next_outbox_id: i64,
}

/// 内存订单账本 + outbox
#[derive(Default)]
pub struct InMemoryOrderRepository {
    state: Mutex<LedgerState>,
    fail_writes: AtomicBool,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用：开启后所有写操作返回持久化错误
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 订单快照
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.clone()
    }

    /// outbox 快照
    pub fn outbox(&self) -> Vec<OutboxRecord> {
        self.state.lock().outbox.clone()
    }

    /// 尚未被通道确认的 outbox 记录数
    pub fn pending_outbox(&self) -> usize {
        self.state
            .lock()
            .outbox
            .iter()
            .filter(|r| r.published_at.is_none())
            .count()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(OrderError::Persistence(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn insert_order(state: &mut LedgerState, order: &NewOrder) -> Order {
        state.next_order_id += 1;
        let created = Order {
            id: state.next_order_id,
            user_id: order.user_id,
            product_id: order.product_id,
            quantity: order.quantity,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        };
        state.orders.push(created.clone());
        created
    }
}

fn to_time_delta(duration: Duration) -> Result<TimeDelta> {
    TimeDelta::from_std(duration).map_err(|e| OrderError::Internal(format!("无效的租约时长: {e}")))
}

#[async_trait]
impl OrderRepositoryTrait for InMemoryOrderRepository {
    async fn create(&self, order: &NewOrder) -> Result<Order> {
        self.check_writable()?;
        let mut state = self.state.lock();
        Ok(Self::insert_order(&mut state, order))
    }

    async fn create_with_event(&self, order: &NewOrder, topic: &str) -> Result<Order> {
        self.check_writable()?;

        let mut state = self.state.lock();
        let created = Self::insert_order(&mut state, order);

        let event = created.to_event();
        let payload = serde_json::to_value(&event)
            .map_err(|e| OrderError::Internal(format!("订单事件序列化失败: {e}")))?;

        state.next_outbox_id += 1;
        let now = Utc::now();
        let record = OutboxRecord {
            id: state.next_outbox_id,
            order_id: created.id,
            topic: topic.to_string(),
            partition_key: event.partition_key(),
            event_type: ORDER_CREATED_EVENT_TYPE.to_string(),
            payload,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            published_at: None,
            created_at: now,
        };
        state.outbox.push(record);

        Ok(created)
    }

    async fn get(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.state.lock().orders.iter().find(|o| o.id == id).cloned())
    }
}

#[async_trait]
impl OutboxRepositoryTrait for InMemoryOrderRepository {
    async fn claim_batch(&self, limit: i64, lease: Duration) -> Result<Vec<OutboxRecord>> {
        let lease = to_time_delta(lease)?;
        let limit = usize::try_from(limit).unwrap_or(0);
        let now = Utc::now();

        let mut state = self.state.lock();
        let mut claimed = Vec::new();
        for record in state
            .outbox
            .iter_mut()
            .filter(|r| r.published_at.is_none() && r.next_attempt_at <= now)
            .take(limit)
        {
            record.next_attempt_at = now + lease;
            record.attempts += 1;
            claimed.push(record.clone());
        }

        Ok(claimed)
    }

    async fn mark_published(&self, id: i64) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        if let Some(record) = state.outbox.iter_mut().find(|r| r.id == id) {
            record.published_at = Some(Utc::now());
            record.last_error = None;
        }
        Ok(())
    }

    async fn release(&self, id: i64, error: &str, retry_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(record) = state
            .outbox
            .iter_mut()
            .find(|r| r.id == id && r.published_at.is_none())
        {
            record.next_attempt_at = retry_at;
            record.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order(quantity: i32) -> NewOrder {
        NewOrder {
            user_id: 1,
            product_id: 123,
            quantity,
        }
    }

    #[tokio::test]
    async fn test_ids_are_assigned_monotonically() {
        let repo = InMemoryOrderRepository::new();
        let a = repo.create(&new_order(1)).await.unwrap();
        let b = repo.create(&new_order(2)).await.unwrap();

        assert!(b.id > a.id);
        assert_eq!(a.status, OrderStatus::Pending);
        assert_eq!(repo.get(b.id).await.unwrap().unwrap().quantity, 2);
        assert!(repo.get(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_with_event_writes_both_rows() {
        let repo = InMemoryOrderRepository::new();
        let order = repo
            .create_with_event(&new_order(30), "order.created")
            .await
            .unwrap();

        let outbox = repo.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].order_id, order.id);
        assert_eq!(outbox[0].partition_key, "123");
        assert_eq!(outbox[0].payload["quantity"], 30);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_nothing() {
        let repo = InMemoryOrderRepository::new();
        repo.set_fail_writes(true);

        let result = repo.create_with_event(&new_order(1), "order.created").await;
        assert!(matches!(result, Err(OrderError::Persistence(_))));
        assert!(repo.orders().is_empty());
        assert!(repo.outbox().is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_lease() {
        let repo = InMemoryOrderRepository::new();
        repo.create_with_event(&new_order(1), "order.created")
            .await
            .unwrap();

        let first = repo.claim_batch(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attempts, 1);

        // 租约期内不可再次领取
        let second = repo.claim_batch(10, Duration::from_secs(30)).await.unwrap();
        assert!(second.is_empty());

        // 释放为立即重试后可以再次领取
        repo.release(first[0].id, "broker down", Utc::now())
            .await
            .unwrap();
        let third = repo.claim_batch(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].attempts, 2);
        assert_eq!(third[0].last_error.as_deref(), Some("broker down"));

        repo.mark_published(third[0].id).await.unwrap();
        assert_eq!(repo.pending_outbox(), 0);
    }
}
