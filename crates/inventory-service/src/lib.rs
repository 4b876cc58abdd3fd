//! 库存服务
//!
//! 消费订单创建事件并对库存执行条件扣减，保证库存永不为负。
//! 同一事件可能被投递多次，扣减以订单 ID 为幂等键。
//!
//! ## 模块结构
//!
//! - `models`: 库存与扣减结果
//! - `error`: 错误类型定义
//! - `repository`: 库存账本（PostgreSQL / 内存）
//! - `reconciler`: 单条事件的对账处理
//! - `consumer`: Kafka 消费循环
//! - `handlers` / `routes` / `state`: HTTP 层

pub mod consumer;
pub mod error;
pub mod handlers;
pub mod models;
pub mod reconciler;
pub mod repository;
pub mod routes;
pub mod state;

pub use consumer::InventoryConsumer;
pub use error::{InventoryError, Result};
pub use models::{DecrementOutcome, ReconciliationStatus, Stock};
pub use reconciler::{DropReason, InventoryReconciler, ReconcileOutcome};
pub use repository::{InMemoryStockRepository, StockRepository, StockRepositoryTrait};

/// 嵌入的数据库迁移
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
