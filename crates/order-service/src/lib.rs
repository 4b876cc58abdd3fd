//! 订单服务
//!
//! 接收经过认证的下单请求，持久化订单并向事件通道发布订单创建事件。
//!
//! ## 模块结构
//!
//! - `models`: 订单与 outbox 记录
//! - `error`: 错误类型定义
//! - `repository`: 订单账本与 outbox 仓储
//! - `auth`: Bearer Token 校验
//! - `service`: 下单流程
//! - `outbox`: outbox 分发器
//! - `handlers` / `routes` / `middleware` / `state`: HTTP 层

pub mod auth;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod outbox;
pub mod repository;
pub mod routes;
pub mod service;
pub mod state;

pub use error::{OrderError, Result};
pub use models::{NewOrder, Order, OrderStatus, OutboxRecord};
pub use outbox::OutboxDispatcher;
pub use repository::{
    InMemoryOrderRepository, OrderRepository, OrderRepositoryTrait, OutboxRepository,
    OutboxRepositoryTrait,
};
pub use service::OrderService;

/// 嵌入的数据库迁移
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
