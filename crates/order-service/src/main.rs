//! 订单服务
//!
//! 提供下单 REST API，订单事件通过 outbox 或直接发布到 Kafka。

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, middleware, routing::get};
use order_service::{
    MIGRATOR, OrderRepository, OrderService, OutboxDispatcher, OutboxRepository,
    auth::{JwtConfig, JwtValidator},
    routes,
    state::AppState,
};
use orderflow_shared::{
    config::{AppConfig, PublishMode},
    database::Database,
    kafka::KafkaProducer,
    observability::{self, middleware as obs_middleware},
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "order-service";

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
        publish_mode = ?config.orders.publish_mode,
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );

    // 启动阶段存储或通道不可用视为致命错误
    let db = Database::connect(&config.database).await?;
    db.run_migrations(&MIGRATOR).await?;
    let producer = Arc::new(KafkaProducer::new(&config.kafka)?);

    // 签名密钥由启动上下文持有，显式传给校验器
    let validator = Arc::new(JwtValidator::new(JwtConfig::from(&config.auth)));

    let order_repo = Arc::new(OrderRepository::new(db.pool().clone()));
    let order_service = Arc::new(
        OrderService::new(order_repo, producer.clone(), config.orders.publish_mode)
            .with_topic(config.kafka.order_topic.clone()),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher_handle = match config.orders.publish_mode {
        PublishMode::Outbox => {
            let outbox_repo = Arc::new(OutboxRepository::new(db.pool().clone()));
            let dispatcher = OutboxDispatcher::new(outbox_repo, producer.clone(), &config.orders);
            Some(tokio::spawn(dispatcher.run(shutdown_rx.clone())))
        }
        PublishMode::Direct => {
            warn!("直接发布模式：写库成功后发布失败的事件不会补发");
            None
        }
    };

    let state = AppState::new(order_service, validator);

    let db_for_ready = db.clone();
    let app = routes::router(state)
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

    let server_exited = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut server_task => {
            log_server_result(result);
            true
        }
    };

    let _ = shutdown_tx.send(true);

    // 停止接收新连接，在宽限期内等待在途请求完成
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

    if let Some(handle) = dispatcher_handle
        && let Err(e) = handle.await
    {
        error!(error = %e, "outbox 分发器异常退出");
    }

    if let Err(e) = producer.flush(Duration::from_secs(5)) {
        warn!(error = %e, "刷出生产者队列失败");
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

fn log_server_result(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("HTTP 服务已停止"),
        Ok(Err(e)) => error!(error = %e, "HTTP 服务异常退出"),
        Err(e) => error!(error = %e, "HTTP 服务任务异常"),
    }
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
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
