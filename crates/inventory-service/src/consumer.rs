//! 订单事件消费者
//!
//! 将 Kafka 消息交给对账器处理，并把对账结果映射为位点处置。
//! 消费循环绑定关闭信号，关闭时当前消息处理完毕后退出。

use std::sync::Arc;

use orderflow_shared::config::KafkaConfig;
use orderflow_shared::error::OrderflowError;
use orderflow_shared::kafka::{ConsumerExit, ConsumerMessage, KafkaConsumer, MessageDisposition};
use orderflow_shared::observability::tracing::set_parent_from_headers;
use orderflow_shared::retry::RetryPolicy;
use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span};

use crate::error::Result;
use crate::reconciler::InventoryReconciler;

/// 库存消费者
pub struct InventoryConsumer {
    consumer: KafkaConsumer,
    reconciler: Arc<InventoryReconciler>,
    topic: String,
}

impl InventoryConsumer {
    /// 按配置创建消费者并订阅订单 topic
    ///
    /// 订阅失败直接返回错误，调用方应在启动阶段终止进程。
    /// `redelivery` 决定延迟消息的重投退避。
    pub fn new(
        config: &KafkaConfig,
        reconciler: Arc<InventoryReconciler>,
        redelivery: RetryPolicy,
    ) -> Result<Self> {
        let consumer = KafkaConsumer::new(config)?.with_redelivery_policy(redelivery);
        consumer.subscribe(&[config.order_topic.as_str()])?;
        Ok(Self {
            consumer,
            reconciler,
            topic: config.order_topic.clone(),
        })
    }

    /// 消费直到收到关闭信号
    ///
    /// 消息流提前结束时返回错误，库存对账已无法继续。
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            topic = %self.topic,
            dedup_enabled = self.reconciler.dedup_enabled(),
            "库存消费者已启动"
        );

        let reconciler = self.reconciler;
        let exit = self
            .consumer
            .start(shutdown, |msg| {
                let reconciler = reconciler.clone();
                async move { handle_message(&reconciler, msg).await }
            })
            .await;

        check_exit(exit)
    }
}

fn check_exit(exit: ConsumerExit) -> Result<()> {
    match exit {
        ConsumerExit::Shutdown => {
            info!("库存消费者已停止");
            Ok(())
        }
        ConsumerExit::StreamEnded => {
            error!("库存消费者在未收到关闭信号时停止");
            Err(OrderflowError::Kafka("消息流意外结束".to_string()).into())
        }
    }
}

/// 处理单条消息并给出位点处置
///
/// 上游在消息头中携带 traceparent 时，处理 span 挂在上游链路下。
pub async fn handle_message(
    reconciler: &InventoryReconciler,
    msg: ConsumerMessage,
) -> MessageDisposition {
    let span = info_span!(
        "reconcile_order_event",
        topic = %msg.topic,
        partition = msg.partition,
        offset = msg.offset,
        key = msg.key.as_deref().unwrap_or_default(),
    );
    set_parent_from_headers(&span, &msg.headers);

    let outcome = reconciler.handle(&msg.payload).instrument(span).await;

    if outcome.commits_offset() {
        MessageDisposition::Commit
    } else {
        MessageDisposition::Redeliver
    }
}
