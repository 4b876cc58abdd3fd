//! 订单仓储层
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 订单与 outbox 记录的原子写入由仓储在单个事务内完成
//! - 定义 trait 接口以支持 mock 测试和内存实现

mod memory_repo;
mod order_repo;
mod outbox_repo;
mod traits;

pub use memory_repo::InMemoryOrderRepository;
pub use order_repo::OrderRepository;
pub use outbox_repo::OutboxRepository;
pub use traits::*;
