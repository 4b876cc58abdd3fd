//! 日志与分布式追踪
//!
//! 日志始终输出到 stdout；配置了 OTLP 端点时额外挂载 OpenTelemetry 层。
//! 订单事件经过 Kafka 时，追踪上下文以 W3C traceparent 写在消息头里，
//! 库存服务据此把处理 span 接到下单请求的链路上。

use std::collections::HashMap;

use anyhow::Result;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use super::ObservabilityConfig;

/// 持有 TracerProvider，Drop 时导出尚未发送的 span
pub struct TracingGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("关闭 TracerProvider 失败: {e:?}");
        }
    }
}

/// 安装全局 subscriber
///
/// `RUST_LOG` 优先于配置中的日志级别。
pub fn init(config: &ObservabilityConfig) -> Result<TracingGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = match &config.otlp_endpoint {
        Some(endpoint) => Some(build_provider(&config.service_name, endpoint)?),
        None => None,
    };
    let otel_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(config.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(log_layer(config.json_logs))
        .with(otel_layer)
        .with(filter)
        .try_init()?;

    Ok(TracingGuard { provider })
}

/// 生产环境输出 JSON 便于采集，本地开发输出彩色文本
fn log_layer(json: bool) -> Box<dyn Layer<Registry> + Send + Sync> {
    if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    }
}

fn build_provider(service_name: &str, endpoint: &str) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_string())
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    Ok(provider)
}

// ---------------------------------------------------------------------------
// 消息头传播
// ---------------------------------------------------------------------------

/// 只读视图，供 propagator 从消息头读取
struct HeaderReader<'a>(&'a HashMap<String, String>);

impl Extractor for HeaderReader<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// 可写视图，供 propagator 写入消息头
struct HeaderWriter<'a>(&'a mut HashMap<String, String>);

impl Injector for HeaderWriter<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_owned(), value);
    }
}

/// 从消息头还原上游追踪上下文
pub fn extract_from_headers(headers: &HashMap<String, String>) -> opentelemetry::Context {
    TraceContextPropagator::new().extract(&HeaderReader(headers))
}

/// 把当前 span 的上下文写入消息头
///
/// 当前不在任何有效 span 中时消息头保持不变。
pub fn inject_to_headers(headers: &mut HashMap<String, String>) {
    let context = tracing::Span::current().context();
    TraceContextPropagator::new().inject_context(&context, &mut HeaderWriter(headers));
}

/// 把 `span` 挂到消息头携带的上游链路下
pub fn set_parent_from_headers(span: &tracing::Span, headers: &HashMap<String, String>) {
    let _ = span.set_parent(extract_from_headers(headers));
}

#[cfg(test)]
mod tests {
    use opentelemetry::trace::TraceContextExt;

    use super::*;

    const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_missing_headers_yield_empty_context() {
        let context = extract_from_headers(&HashMap::new());
        assert!(!context.has_active_span());
    }

    #[test]
    fn test_traceparent_is_extracted() {
        let headers = HashMap::from([("traceparent".to_string(), TRACEPARENT.to_string())]);

        let context = extract_from_headers(&headers);
        let span_context = context.span().span_context().clone();

        assert!(span_context.is_valid());
        assert_eq!(
            span_context.trace_id().to_string(),
            "0af7651916cd43dd8448eb211c80319c"
        );
    }

    #[test]
    fn test_inject_without_span_writes_nothing() {
        let mut headers = HashMap::new();
        inject_to_headers(&mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_set_parent_on_disabled_span() {
        let headers = HashMap::from([("traceparent".to_string(), TRACEPARENT.to_string())]);
        // 未安装 subscriber 时 span 为 disabled，不应 panic
        set_parent_from_headers(&tracing::Span::none(), &headers);
    }
}
