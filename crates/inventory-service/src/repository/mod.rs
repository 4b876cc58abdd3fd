//! 库存仓储层
//!
//! 条件扣减在存储层以单条原子操作完成，不做应用层的先读后写。

mod memory_repo;
mod stock_repo;
mod traits;

pub use memory_repo::InMemoryStockRepository;
pub use stock_repo::StockRepository;
pub use traits::*;

use crate::error::{InventoryError, Result};

/// 扣减数量必须为正，否则条件扣减会变成加库存
pub(crate) fn check_decrement_quantity(quantity: i32) -> Result<()> {
    if quantity <= 0 {
        return Err(InventoryError::Validation(format!(
            "扣减数量必须为正: {}",
            quantity
        )));
    }
    Ok(())
}
