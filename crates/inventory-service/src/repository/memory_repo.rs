//! 内存库存仓储
//!
//! 基于 DashMap 的分片锁实现条件扣减的原子性：扣减在持有该商品条目写锁时完成。
//! 幂等扣减先锁定订单条目再锁定库存条目，加锁顺序固定。

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::check_decrement_quantity;
use super::traits::StockRepositoryTrait;
use crate::error::{InventoryError, Result};
use crate::models::{DecrementOutcome, ReconciliationStatus, Stock};

/// 内存库存账本
#[derive(Default)]
pub struct InMemoryStockRepository {
    stock: DashMap<i64, Stock>,
    reconciled: DashMap<i64, ReconciliationStatus>,
    unavailable: AtomicBool,
}

impl InMemoryStockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用：开启后所有操作返回数据库错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// 直接读取数量（测试断言用）
    pub fn quantity(&self, product_id: i64) -> Option<i32> {
        self.stock.get(&product_id).map(|s| s.quantity)
    }

    /// 某订单的对账结果
    pub fn reconciliation(&self, order_id: i64) -> Option<ReconciliationStatus> {
        self.reconciled.get(&order_id).map(|s| *s)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(InventoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn apply(&self, product_id: i64, quantity: i32) -> DecrementOutcome {
        match self.stock.get_mut(&product_id) {
            Some(mut stock) if stock.quantity >= quantity => {
                stock.quantity -= quantity;
                stock.updated_at = Utc::now();
                DecrementOutcome::Applied
            }
            _ => DecrementOutcome::InsufficientStock,
        }
    }
}

#[async_trait]
impl StockRepositoryTrait for InMemoryStockRepository {
    async fn ensure(&self, product_id: i64, initial_quantity: i32) -> Result<()> {
        self.check_available()?;
        if initial_quantity < 0 {
            return Err(InventoryError::Validation(format!(
                "初始库存不能为负: {}",
                initial_quantity
            )));
        }

        self.stock.entry(product_id).or_insert_with(|| Stock {
            product_id,
            quantity: initial_quantity,
            updated_at: Utc::now(),
        });
        Ok(())
    }

    async fn get(&self, product_id: i64) -> Result<Option<Stock>> {
        self.check_available()?;
        Ok(self.stock.get(&product_id).map(|s| s.clone()))
    }

    async fn decrement(&self, product_id: i64, quantity: i32) -> Result<DecrementOutcome> {
        check_decrement_quantity(quantity)?;
        self.check_available()?;
        Ok(self.apply(product_id, quantity))
    }

    async fn decrement_once(
        &self,
        order_id: i64,
        product_id: i64,
        quantity: i32,
    ) -> Result<DecrementOutcome> {
        check_decrement_quantity(quantity)?;
        self.check_available()?;

        match self.reconciled.entry(order_id) {
            Entry::Occupied(_) => Ok(DecrementOutcome::AlreadyApplied),
            Entry::Vacant(vacant) => {
                let outcome = self.apply(product_id, quantity);
                let status = match outcome {
                    DecrementOutcome::Applied => ReconciliationStatus::Applied,
                    _ => ReconciliationStatus::InsufficientStock,
                };
                vacant.insert(status);
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicI32;

    use super::*;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let repo = InMemoryStockRepository::new();
        repo.ensure(123, 100).await.unwrap();
        repo.ensure(123, 5).await.unwrap();

        assert_eq!(repo.get(123).await.unwrap().unwrap().quantity, 100);
        assert!(repo.get(456).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_rejects_negative() {
        let repo = InMemoryStockRepository::new();
        assert!(matches!(
            repo.ensure(1, -1).await,
            Err(InventoryError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_decrement_exact_boundary() {
        let repo = InMemoryStockRepository::new();
        repo.ensure(123, 10).await.unwrap();

        // 数量为 q-1 时扣减 q 失败且不变
        assert_eq!(
            repo.decrement(123, 11).await.unwrap(),
            DecrementOutcome::InsufficientStock
        );
        assert_eq!(repo.quantity(123), Some(10));

        assert_eq!(
            repo.decrement(123, 10).await.unwrap(),
            DecrementOutcome::Applied
        );
        assert_eq!(repo.quantity(123), Some(0));
    }

    #[tokio::test]
    async fn test_decrement_rejects_non_positive_quantity() {
        let repo = InMemoryStockRepository::new();
        repo.ensure(1, 10).await.unwrap();

        for quantity in [0, -5] {
            assert!(matches!(
                repo.decrement(1, quantity).await,
                Err(InventoryError::Validation(_))
            ));
            assert!(matches!(
                repo.decrement_once(7, 1, quantity).await,
                Err(InventoryError::Validation(_))
            ));
        }

        assert_eq!(repo.quantity(1), Some(10));
        // 被拒绝的请求不占用订单的幂等键
        assert_eq!(repo.reconciliation(7), None);
    }

    #[tokio::test]
    async fn test_decrement_unprovisioned_product() {
        let repo = InMemoryStockRepository::new();
        assert_eq!(
            repo.decrement(999, 1).await.unwrap(),
            DecrementOutcome::InsufficientStock
        );
        assert!(repo.get(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_decrement_once_deduplicates() {
        let repo = InMemoryStockRepository::new();
        repo.ensure(123, 100).await.unwrap();

        assert_eq!(
            repo.decrement_once(1, 123, 30).await.unwrap(),
            DecrementOutcome::Applied
        );
        assert_eq!(
            repo.decrement_once(1, 123, 30).await.unwrap(),
            DecrementOutcome::AlreadyApplied
        );
        assert_eq!(repo.quantity(123), Some(70));
    }

    #[tokio::test]
    async fn test_rejected_order_stays_rejected_after_restock() {
        let repo = InMemoryStockRepository::new();
        repo.ensure(123, 5).await.unwrap();

        assert_eq!(
            repo.decrement_once(1, 123, 10).await.unwrap(),
            DecrementOutcome::InsufficientStock
        );
        assert_eq!(
            repo.reconciliation(1),
            Some(ReconciliationStatus::InsufficientStock)
        );

        // 补货后重投同一订单不会扣减
        repo.stock.alter(&123, |_, mut s| {
            s.quantity = 50;
            s
        });
        assert_eq!(
            repo.decrement_once(1, 123, 10).await.unwrap(),
            DecrementOutcome::AlreadyApplied
        );
        assert_eq!(repo.quantity(123), Some(50));
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let repo = InMemoryStockRepository::new();
        repo.ensure(123, 10).await.unwrap();
        repo.set_unavailable(true);

        assert!(matches!(
            repo.decrement(123, 1).await,
            Err(InventoryError::Database(_))
        ));
        assert!(repo.decrement_once(1, 123, 1).await.is_err());
        assert!(repo.reconciliation(1).is_none());

        repo.set_unavailable(false);
        assert_eq!(repo.quantity(123), Some(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_decrements_never_go_negative() {
        const INITIAL: i32 = 1_000;

        let repo = Arc::new(InMemoryStockRepository::new());
        repo.ensure(123, INITIAL).await.unwrap();
        let applied_total = Arc::new(AtomicI32::new(0));

        let mut handles = Vec::new();
        for i in 0..400 {
            let repo = repo.clone();
            let applied_total = applied_total.clone();
            handles.push(tokio::spawn(async move {
                let quantity = (i % 7) + 1;
                if repo.decrement(123, quantity).await.unwrap() == DecrementOutcome::Applied {
                    applied_total.fetch_add(quantity, Ordering::SeqCst);
                }
                let current = repo.quantity(123).unwrap();
                assert!(current >= 0);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let applied = applied_total.load(Ordering::SeqCst);
        let remaining = repo.quantity(123).unwrap();
        assert!(applied <= INITIAL);
        assert!(remaining >= 0);
        assert_eq!(applied + remaining, INITIAL);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_redelivery_applies_once() {
        let repo = Arc::new(InMemoryStockRepository::new());
        repo.ensure(123, 100).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.decrement_once(42, 123, 30).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap() == DecrementOutcome::Applied {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(repo.quantity(123), Some(70));
    }
}
