//! 路由配置

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::handlers;
use crate::middleware::auth_middleware;
use crate::state::AppState;

/// 业务路由（需认证）与存活探针
///
/// 认证中间件只作用于订单路由，探针保持公开。
pub fn router(state: AppState) -> Router {
    let orders = Router::new()
        .route("/orders", post(handlers::create_order))
        .route("/orders/{order_id}", get(handlers::get_order))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(orders)
        .route("/health", get(handlers::health_check))
        .with_state(state)
}
