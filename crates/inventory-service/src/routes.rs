//! 路由配置

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/stock/{product_id}", get(handlers::get_stock))
        .route("/admin/stock", post(handlers::ensure_stock))
        .route("/health", get(handlers::health_check))
        .with_state(state)
}
