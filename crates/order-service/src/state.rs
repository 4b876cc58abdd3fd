//! 应用状态定义

use std::sync::Arc;

use crate::auth::TokenValidator;
use crate::service::OrderService;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub order_service: Arc<OrderService>,
    /// 由启动上下文构造并注入，持有签名密钥
    pub token_validator: Arc<dyn TokenValidator>,
}

impl AppState {
    pub fn new(order_service: Arc<OrderService>, token_validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            order_service,
            token_validator,
        }
    }
}
