//! 共享库
//!
//! 订单服务与库存服务共用的配置、错误处理、数据库连接、Kafka 客户端、
//! 事件线上格式和可观测性基础设施。

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod test_utils;
