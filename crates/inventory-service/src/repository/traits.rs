//! 仓储 Trait 定义

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DecrementOutcome, Stock};

/// 库存账本接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StockRepositoryTrait: Send + Sync {
    /// 商品不存在时以初始数量入库，已存在时不做任何变更
    async fn ensure(&self, product_id: i64, initial_quantity: i32) -> Result<()>;

    /// 读取当前库存，`None` 表示商品从未入库
    async fn get(&self, product_id: i64) -> Result<Option<Stock>>;

    /// 条件扣减：仅当当前数量不小于 `quantity` 时扣减
    ///
    /// 返回 `Applied` 或 `InsufficientStock`。并发调用之间串行化，库存永不为负。
    async fn decrement(&self, product_id: i64, quantity: i32) -> Result<DecrementOutcome>;

    /// 以订单 ID 为幂等键的条件扣减
    ///
    /// 幂等记录与扣减在同一原子操作中完成；同一订单再次调用返回 `AlreadyApplied`。
    /// 库存不足的结果同样被记录，补货后重投的旧订单不会再被扣减。
    async fn decrement_once(
        &self,
        order_id: i64,
        product_id: i64,
        quantity: i32,
    ) -> Result<DecrementOutcome>;
}
