//! Kafka 基础设施封装
//!
//! 订单服务通过 [`EventPublisher`] 发布订单事件，库存服务通过
//! [`KafkaConsumer`] 逐条消费并决定位点去留。
//!
//! 消费端关闭了自动提交：只有处理方明确给出 `Commit` 时才推进位点，
//! 给出 `Redeliver` 时回拨到当前消息，保证瞬时故障不会丢消息。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::OrderflowError;
use crate::observability;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 从 `BorrowedMessage` 拷贝出的自有数据，可以跨 await 交给处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 从 rdkafka 的借用消息构造，提取并拥有所有字段
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let timestamp = msg.timestamp().to_millis();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp,
            headers,
        }
    }
}

// ---------------------------------------------------------------------------
// EventPublisher
// ---------------------------------------------------------------------------

/// 事件通道的发布端契约
///
/// 返回 `Ok` 即表示通道已确认写入（同步、需确认语义）。
/// 订单服务只依赖这个 trait，便于在测试中替换为内存实现。
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), OrderflowError>;
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// `FutureProducer` 内部是 Arc，克隆后共享同一连接。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaProducer {
    /// 根据配置创建生产者
    ///
    /// `acks=all` 要求所有同步副本确认后才算写入成功；
    /// `message.timeout.ms` 限定单条消息的最长投递时间，超时即返回错误而非无限等待。
    pub fn new(config: &KafkaConfig) -> Result<Self, OrderflowError> {
        let timeout_ms = config.producer_timeout_ms.to_string();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", &timeout_ms)
            .create()
            .map_err(|e| OrderflowError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            timeout: Duration::from_millis(config.producer_timeout_ms),
        })
    }

    /// 发送原始字节消息，等待 broker 确认
    ///
    /// 当前 span 的追踪上下文以 W3C traceparent 形式写入消息头。
    pub async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
    ) -> Result<(i32, i64), OrderflowError> {
        let mut trace_headers = HashMap::new();
        observability::tracing::inject_to_headers(&mut trace_headers);

        let mut headers = OwnedHeaders::new();
        for (k, v) in &trace_headers {
            headers = headers.insert(Header {
                key: k.as_str(),
                value: Some(v.as_str()),
            });
        }

        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload)
            .headers(headers);

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| OrderflowError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 刷出尚在本地队列中的消息，进程退出前调用
    pub fn flush(&self, timeout: Duration) -> Result<(), OrderflowError> {
        self.producer
            .flush(timeout)
            .map_err(|e| OrderflowError::Kafka(format!("刷出生产者队列失败: {e}")))
    }
}

#[async_trait]
impl EventPublisher for KafkaProducer {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), OrderflowError> {
        self.send(topic, key, payload).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 单条消息处理完毕后的位点处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// 提交位点，该消息不会再被本消费组看到
    Commit,
    /// 不提交位点，退避后回拨到该消息重新读取
    Redeliver,
}

/// 消费循环的退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// 收到关闭信号
    Shutdown,
    /// 消息流意外结束
    StreamEnded,
}

/// 按分区跟踪等待重投的消息
///
/// 同一分区同一位点连续延迟时退避逐次加长；该分区提交位点后清零。
#[derive(Debug)]
pub struct RedeliveryTracker {
    policy: RetryPolicy,
    // partition -> (offset, 连续延迟次数)
    deferrals: HashMap<i32, (i64, u32)>,
}

impl RedeliveryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            deferrals: HashMap::new(),
        }
    }

    /// 记录一次延迟，返回连续延迟次数（从 0 计）和本次退避时长
    pub fn defer(&mut self, partition: i32, offset: i64) -> (u32, Duration) {
        let attempt = match self.deferrals.get(&partition) {
            Some((o, n)) if *o == offset => n.saturating_add(1),
            _ => 0,
        };
        self.deferrals.insert(partition, (offset, attempt));
        (attempt, self.policy.delay_for_attempt(attempt))
    }

    /// 分区内的消息已处理完毕
    pub fn resolve(&mut self, partition: i32) {
        self.deferrals.remove(&partition);
    }

    /// 分区当前等待重投的位点
    pub fn pending(&self, partition: i32) -> Option<i64> {
        self.deferrals.get(&partition).map(|(offset, _)| *offset)
    }
}

/// 构造提交列表：提交的是下一条待读位点
fn commit_list(topic: &str, partition: i32, offset: i64) -> Result<TopicPartitionList, OrderflowError> {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
        .map_err(|e| OrderflowError::Kafka(format!("构造提交位点失败: {e}")))?;
    Ok(tpl)
}

/// 面向业务的 Kafka 消费者
///
/// 封装 `StreamConsumer` 并提供基于 `watch` channel 的优雅关闭语义：
/// 正在处理的消息总会执行完毕（或不提交位点地放弃），之后才退订并释放连接。
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    redelivery_policy: RetryPolicy,
}

impl KafkaConsumer {
    /// 以 `config.consumer_group` 为消费组创建消费者
    pub fn new(config: &KafkaConfig) -> Result<Self, OrderflowError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| OrderflowError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            "Kafka 消费者已初始化"
        );
        Ok(Self {
            consumer,
            redelivery_policy: RetryPolicy::default(),
        })
    }

    /// 设置延迟重投的退避策略，重投永不放弃
    pub fn with_redelivery_policy(mut self, policy: RetryPolicy) -> Self {
        self.redelivery_policy = policy;
        self
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), OrderflowError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| OrderflowError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环
    ///
    /// 使用 `tokio::select!` 同时监听消息流和关闭信号：
    /// - 收到消息时调用 handler，根据返回的处置提交位点或回拨重投；
    /// - 关闭信号变为 `true` 时退出循环，正在执行的 handler 会自然完成。
    ///
    /// 无论以何种方式退出，都会退订并随 `self` 一起释放底层连接。
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F) -> ConsumerExit
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = MessageDisposition>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        let mut tracker = RedeliveryTracker::new(self.redelivery_policy.clone());

        info!("Kafka 消费循环已启动");

        let exit = loop {
            if *shutdown.borrow() {
                break ConsumerExit::Shutdown;
            }

            tokio::select! {
                // 偏向关闭信号，保证收到关闭时能尽快退出
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break ConsumerExit::Shutdown;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        break ConsumerExit::StreamEnded;
                    };

                    let msg = match msg_result {
                        Ok(borrowed_msg) => ConsumerMessage::from_borrowed(&borrowed_msg),
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };

                    debug!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "收到 Kafka 消息"
                    );

                    let (topic, partition, offset) = (msg.topic.clone(), msg.partition, msg.offset);

                    match handler(msg).await {
                        MessageDisposition::Commit => {
                            tracker.resolve(partition);
                            if let Err(e) = self.commit(&topic, partition, offset) {
                                // 提交失败只会导致重复投递，由处理方的幂等保证兜底
                                warn!(error = %e, topic, partition, offset, "提交位点失败");
                            }
                        }
                        MessageDisposition::Redeliver => {
                            let (attempt, delay) = tracker.defer(partition, offset);
                            warn!(
                                topic,
                                partition,
                                offset,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "消息处理延迟，退避后重新投递"
                            );

                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown.changed() => {}
                            }

                            // 回拨不成功就不能继续读该分区，否则后续位点会越过这条消息提交
                            let rewound = retry_seek(
                                || self.rewind(&topic, partition, offset),
                                &self.redelivery_policy,
                                &mut shutdown,
                            )
                            .await;
                            if !rewound {
                                break ConsumerExit::Shutdown;
                            }
                        }
                    }
                }
            }
        };

        match exit {
            ConsumerExit::Shutdown => info!("收到关闭信号，Kafka 消费循环退出"),
            ConsumerExit::StreamEnded => error!("Kafka 消息流意外结束"),
        }

        self.consumer.unsubscribe();
        info!("Kafka 消费者已退订");
        exit
    }

    fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<(), OrderflowError> {
        let tpl = commit_list(topic, partition, offset)?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| OrderflowError::Kafka(format!("提交位点失败: {e}")))
    }

    /// 回拨到指定消息，下次拉取从它开始
    fn rewind(&self, topic: &str, partition: i32, offset: i64) -> Result<(), OrderflowError> {
        self.consumer
            .seek(topic, partition, Offset::Offset(offset), Duration::from_secs(5))
            .map_err(|e| OrderflowError::Kafka(format!("回拨位点失败: {e}")))
    }
}

/// 反复执行 `seek` 直到成功；期间收到关闭信号返回 `false`
async fn retry_seek<S>(
    mut seek: S,
    policy: &RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> bool
where
    S: FnMut() -> Result<(), OrderflowError>,
{
    let mut attempt = 0u32;
    loop {
        let e = match seek() {
            Ok(()) => return true,
            Err(e) => e,
        };

        let delay = policy.delay_for_attempt(attempt);
        error!(
            error = %e,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "回拨位点失败，退避后重试"
        );
        attempt = attempt.saturating_add(1);

        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OrderEvent;

    fn make_message(payload: &[u8]) -> ConsumerMessage {
        ConsumerMessage {
            topic: "order.created".to_string(),
            partition: 0,
            offset: 42,
            key: Some("123".to_string()),
            payload: payload.to_vec(),
            timestamp: Some(1_700_000_000_000),
            headers: HashMap::from([("traceparent".to_string(), "00-abc".to_string())]),
        }
    }

    #[test]
    fn test_owned_message_fields() {
        let msg = make_message(b"hello");

        assert_eq!(msg.topic, "order.created");
        assert_eq!(msg.partition, 0);
        assert_eq!(msg.offset, 42);
        assert_eq!(msg.key.as_deref(), Some("123"));
        assert_eq!(msg.payload, b"hello");
        assert_eq!(msg.headers.get("traceparent").unwrap(), "00-abc");
    }

    #[test]
    fn test_consumer_message_carries_order_event() {
        let msg = make_message(br#"{"order_id":1,"user_id":2,"product_id":123,"quantity":30}"#);

        let event = OrderEvent::from_slice(&msg.payload).unwrap();
        assert_eq!(event.partition_key(), msg.key.unwrap());
        assert_eq!(event.quantity, 30);
    }

    fn tracker() -> RedeliveryTracker {
        RedeliveryTracker::new(RetryPolicy::unbounded(
            Duration::from_millis(100),
            Duration::from_millis(1000),
        ))
    }

    #[test]
    fn test_repeated_deferral_backs_off() {
        let mut tracker = tracker();

        let delays: Vec<_> = (0..5).map(|_| tracker.defer(0, 42)).collect();
        assert_eq!(
            delays,
            vec![
                (0, Duration::from_millis(100)),
                (1, Duration::from_millis(200)),
                (2, Duration::from_millis(400)),
                (3, Duration::from_millis(800)),
                (4, Duration::from_millis(1000)),
            ]
        );
        assert_eq!(tracker.pending(0), Some(42));
    }

    #[test]
    fn test_new_offset_restarts_backoff() {
        let mut tracker = tracker();
        tracker.defer(0, 42);
        tracker.defer(0, 42);

        assert_eq!(tracker.defer(0, 43), (0, Duration::from_millis(100)));
        assert_eq!(tracker.pending(0), Some(43));
    }

    #[test]
    fn test_partitions_are_tracked_separately() {
        let mut tracker = tracker();
        tracker.defer(0, 42);
        tracker.defer(0, 42);

        assert_eq!(tracker.defer(1, 42).0, 0);
        assert_eq!(tracker.defer(0, 42).0, 2);
    }

    #[test]
    fn test_commit_resets_deferral() {
        let mut tracker = tracker();
        tracker.defer(0, 42);
        tracker.defer(0, 42);

        tracker.resolve(0);

        assert_eq!(tracker.pending(0), None);
        // 同一位点再次延迟时从头退避
        assert_eq!(tracker.defer(0, 42).0, 0);
    }

    #[tokio::test]
    async fn test_seek_is_retried_until_it_succeeds() {
        let (_tx, mut rx) = watch::channel(false);
        let mut failures = 3;

        let rewound = retry_seek(
            || {
                if failures > 0 {
                    failures -= 1;
                    return Err(OrderflowError::Kafka("seek timed out".into()));
                }
                Ok(())
            },
            &RetryPolicy::unbounded(Duration::ZERO, Duration::ZERO),
            &mut rx,
        )
        .await;

        assert!(rewound);
        assert_eq!(failures, 0);
    }

    #[tokio::test]
    async fn test_seek_retry_stops_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let mut calls = 0;

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        });

        let rewound = tokio::time::timeout(
            Duration::from_secs(2),
            retry_seek(
                || {
                    calls += 1;
                    Err(OrderflowError::Kafka("partition not assigned".into()))
                },
                &RetryPolicy::unbounded(Duration::from_millis(10), Duration::from_millis(10)),
                &mut rx,
            ),
        )
        .await
        .unwrap();

        stopper.await.unwrap();
        assert!(!rewound);
        assert!(calls >= 1);
    }

    #[test]
    fn test_commit_list_points_past_message() {
        let tpl = commit_list("order.created", 3, 42).unwrap();

        let elem = tpl.find_partition("order.created", 3).unwrap();
        assert_eq!(elem.offset(), Offset::Offset(43));
        assert_eq!(tpl.count(), 1);
    }

    #[tokio::test]
    async fn test_consumer_uses_configured_group() {
        let config = KafkaConfig {
            consumer_group: "inventory-group".to_string(),
            ..KafkaConfig::default()
        };

        // 创建消费者不需要连接 broker
        assert!(KafkaConsumer::new(&config).is_ok());
    }
}
