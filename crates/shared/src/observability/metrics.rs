//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::ObservabilityConfig;

/// `/metrics` 抓取端点，Drop 时停止
pub struct MetricsServer {
    task: JoinHandle<()>,
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 安装全局 recorder 并在 `metrics_port` 上暴露 `/metrics`
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsServer> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics(&config.service_name);

    let app = Router::new().route("/metrics", get(move || std::future::ready(handle.render())));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "指标端点已启动");

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "指标端点异常退出");
        }
    });

    Ok(MetricsServer { task })
}

/// 指标描述出现在 /metrics 的 HELP 注释中
fn describe_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!("orders_created_total", "Total number of persisted orders");
    metrics::describe_counter!(
        "order_events_published_total",
        "Order events handed to the broker, by result"
    );
    metrics::describe_counter!(
        "outbox_dispatch_total",
        "Outbox records dispatched, by result"
    );
    metrics::describe_gauge!("outbox_pending", "Outbox records claimed in the last poll");

    metrics::describe_counter!(
        "stock_decrements_total",
        "Stock decrement attempts, by outcome"
    );
    metrics::describe_counter!(
        "reconciler_messages_total",
        "Order events handled by the reconciler, by outcome and drop reason"
    );
    metrics::describe_histogram!(
        "reconciler_handle_duration_seconds",
        "Reconciler handling duration in seconds"
    );
    metrics::describe_gauge!("stock_quantity", "Last observed stock quantity per product");

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录订单落库，mode 为发布方式（direct / outbox）
#[inline]
pub fn record_order_created(mode: &str) {
    metrics::counter!("orders_created_total", "mode" => mode.to_string()).increment(1);
}

/// 记录事件发布结果（success / failure）
#[inline]
pub fn record_event_published(result: &str) {
    metrics::counter!("order_events_published_total", "result" => result.to_string())
        .increment(1);
}

/// 记录 outbox 分发结果
#[inline]
pub fn record_outbox_dispatch(result: &str) {
    metrics::counter!("outbox_dispatch_total", "result" => result.to_string()).increment(1);
}

/// 更新本轮拉取到的 outbox 记录数
#[inline]
pub fn set_outbox_pending(count: usize) {
    metrics::gauge!("outbox_pending").set(count as f64);
}

/// 记录库存扣减结果（applied / insufficient_stock / already_applied）
#[inline]
pub fn record_stock_decrement(outcome: &str) {
    metrics::counter!("stock_decrements_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录对账器处理结果
#[inline]
///
/// `reason` 只对丢弃的消息有意义，其余结果传 `"none"`。
pub fn record_reconciler_message(outcome: &str, reason: &str, duration_secs: f64) {
    metrics::counter!(
        "reconciler_messages_total",
        "outcome" => outcome.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "reconciler_handle_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// 更新商品库存观测值
#[inline]
pub fn set_stock_quantity(product_id: i64, quantity: i32) {
    metrics::gauge!("stock_quantity", "product_id" => product_id.to_string())
        .set(f64::from(quantity));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未安装 recorder 时记录操作为空操作
        record_http_request("POST", "/orders", 201, 0.1);
        record_order_created("outbox");
        record_event_published("failure");
        record_outbox_dispatch("success");
        set_outbox_pending(3);
        record_stock_decrement("applied");
        record_reconciler_message("dropped", "malformed", 0.01);
        set_stock_quantity(123, 70);
    }
}
