//! 应用状态定义

use std::sync::Arc;

use crate::repository::StockRepositoryTrait;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub stock: Arc<dyn StockRepositoryTrait>,
}

impl AppState {
    pub fn new(stock: Arc<dyn StockRepositoryTrait>) -> Self {
        Self { stock }
    }
}
