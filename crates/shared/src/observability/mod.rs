//! 可观测性
//!
//! 日志、追踪与 Prometheus 指标的统一入口，两个服务在启动时各调用一次。

pub mod metrics;
pub mod middleware;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

pub use crate::config::ObservabilityConfig;

/// 进程退出前保持存活，Drop 时停止指标端点并导出剩余 span
pub struct ObservabilityGuard {
    _metrics: Option<metrics::MetricsServer>,
    _tracing: tracing::TracingGuard,
}

/// 先装 subscriber 再装指标，保证指标初始化过程中的日志可见
///
/// ```ignore
/// let obs_config = config.observability.clone().with_service_name(&config.service_name);
/// let _guard = observability::init(&obs_config).await?;
/// ```
pub async fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    let tracing_guard = tracing::init(config)?;

    let metrics_server = if config.metrics_enabled {
        Some(metrics::init(config).await?)
    } else {
        None
    };

    info!(
        service = %config.service_name,
        metrics_port = config.metrics_enabled.then_some(config.metrics_port),
        otlp_endpoint = config.otlp_endpoint.as_deref(),
        "可观测性已初始化"
    );

    Ok(ObservabilityGuard {
        _metrics: metrics_server,
        _tracing: tracing_guard,
    })
}
