//! 库存服务
//!
//! 消费订单创建事件扣减库存，并提供库存查询与入库 API。

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, middleware, routing::get};
use inventory_service::{
    InventoryConsumer, InventoryReconciler, MIGRATOR, StockRepository, StockRepositoryTrait,
    routes, state::AppState,
};
use orderflow_shared::{
    config::AppConfig,
    database::Database,
    observability::{self, middleware as obs_middleware},
    retry::RetryPolicy,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "inventory-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    config.validate()?;

    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        dedup_enabled = config.inventory.dedup_enabled,
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );

    let db = Database::connect(&config.database).await?;
    db.run_migrations(&MIGRATOR).await?;

    let stock: Arc<dyn StockRepositoryTrait> = Arc::new(StockRepository::new(db.pool().clone()));

    // 已有库存的商品保持原值
    for seed in &config.inventory.seed {
        stock.ensure(seed.product_id, seed.quantity).await?;
        info!(product_id = seed.product_id, quantity = seed.quantity, "初始库存已就绪");
    }

    let reconciler = Arc::new(InventoryReconciler::new(
        stock.clone(),
        config.inventory.dedup_enabled,
    ));
    if !config.inventory.dedup_enabled {
        warn!("未启用订单幂等：重复投递的事件会被重复扣减");
    }

    let redelivery = RetryPolicy::unbounded(
        Duration::from_millis(config.inventory.redelivery_backoff_ms),
        Duration::from_millis(config.inventory.redelivery_backoff_max_ms),
    );
    // 订阅失败时进程直接退出
    let consumer = InventoryConsumer::new(&config.kafka, reconciler, redelivery)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut consumer_handle = tokio::spawn(consumer.run(shutdown_rx.clone()));

    let db_for_ready = db.clone();
    let app = routes::router(AppState::new(stock))
        .route(
            "/ready",
            get(move || readiness_check(db_for_ready.clone())),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id));

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    let mut server_rx = shutdown_rx.clone();
    let mut server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    let mut consumer_exited = false;
    let server_exited = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut server_task => {
            log_server_result(result);
            true
        }
        result = &mut consumer_handle => {
            log_consumer_result(result);
            error!("库存消费者提前退出，服务随之关闭");
            consumer_exited = true;
            false
        }
    };

    let _ = shutdown_tx.send(true);

    if !server_exited {
        let grace = Duration::from_secs(config.server.shutdown_grace_secs);
        match tokio::time::timeout(grace, &mut server_task).await {
            Ok(result) => log_server_result(result),
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "在途请求未在宽限期内完成，强制关闭");
                server_task.abort();
            }
        }
    }

    // 消费循环处理完当前消息后退出，未提交的位点由下一个实例重新消费
    if !consumer_exited {
        log_consumer_result(consumer_handle.await);
    }

    db.close().await;

    if consumer_exited {
        anyhow::bail!("库存消费者提前退出");
    }

    info!("Server shutdown complete");
    Ok(())
}

fn log_consumer_result(result: Result<inventory_service::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "库存消费者异常退出"),
        Err(e) => error!(error = %e, "库存消费者任务异常"),
    }
}

fn log_server_result(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("HTTP 服务已停止"),
        Ok(Err(e)) => error!(error = %e, "HTTP 服务异常退出"),
        Err(e) => error!(error = %e, "HTTP 服务任务异常"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("注册 Ctrl+C 处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("注册 SIGTERM 处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// 就绪探针：检查数据库连接是否可用
async fn readiness_check(db: Database) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();

    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "service": SERVICE_NAME,
        "checks": {
            "database": if db_ok { "ok" } else { "fail" }
        }
    }))
}
