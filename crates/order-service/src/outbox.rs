//! outbox 分发器
//!
//! 周期性领取到期的 outbox 记录，同步发布到事件通道并标记已发布。
//! 发布失败的记录按指数退避释放，永不放弃，直到通道确认为止。
//!
//! 同一批次中某个分区键发布失败后，该键后续的记录本轮不再尝试，
//! 与失败记录一起顺延，避免同一商品的事件在通道中乱序。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use orderflow_shared::config::OrdersConfig;
use orderflow_shared::kafka::EventPublisher;
use orderflow_shared::observability::metrics;
use orderflow_shared::retry::RetryPolicy;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{OrderError, Result};
use crate::models::OutboxRecord;
use crate::repository::OutboxRepositoryTrait;

/// 单轮分发统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub claimed: usize,
    pub published: usize,
    pub failed: usize,
}

/// outbox 分发器
pub struct OutboxDispatcher {
    outbox: Arc<dyn OutboxRepositoryTrait>,
    publisher: Arc<dyn EventPublisher>,
    batch_size: i64,
    poll_interval: Duration,
    lease: Duration,
    backoff: RetryPolicy,
}

impl OutboxDispatcher {
    pub fn new(
        outbox: Arc<dyn OutboxRepositoryTrait>,
        publisher: Arc<dyn EventPublisher>,
        config: &OrdersConfig,
    ) -> Self {
        Self {
            outbox,
            publisher,
            batch_size: config.outbox_batch_size,
            poll_interval: Duration::from_millis(config.outbox_poll_interval_ms),
            lease: Duration::from_secs(config.outbox_lease_secs),
            backoff: RetryPolicy::unbounded(Duration::from_millis(500), Duration::from_secs(60)),
        }
    }

    /// 覆盖发布失败后的退避策略
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// 执行一轮分发
    pub async fn dispatch_once(&self) -> Result<DispatchStats> {
        let records = self.outbox.claim_batch(self.batch_size, self.lease).await?;
        metrics::set_outbox_pending(records.len());

        let mut stats = DispatchStats {
            claimed: records.len(),
            ..DispatchStats::default()
        };
        let mut blocked_keys: HashSet<String> = HashSet::new();

        for record in records {
            if blocked_keys.contains(&record.partition_key) {
                self.defer(&record, "同一分区键的前序事件尚未发布").await;
                stats.failed += 1;
                continue;
            }

            match self.publish(&record).await {
                Ok(()) => {
                    metrics::record_outbox_dispatch("success");
                    stats.published += 1;
                    // 已发布但标记失败时，租约到期后会重复发布；消费端按订单 ID 去重
                    if let Err(e) = self.outbox.mark_published(record.id).await {
                        warn!(
                            outbox_id = record.id,
                            order_id = record.order_id,
                            error = %e,
                            "事件已发布但标记失败，租约到期后将重复投递"
                        );
                    } else {
                        debug!(outbox_id = record.id, order_id = record.order_id, "outbox 记录已发布");
                    }
                }
                Err(e) => {
                    metrics::record_outbox_dispatch("retry");
                    stats.failed += 1;
                    blocked_keys.insert(record.partition_key.clone());
                    self.defer(&record, &e.to_string()).await;
                }
            }
        }

        Ok(stats)
    }

    async fn publish(&self, record: &OutboxRecord) -> Result<()> {
        let payload = record
            .payload_bytes()
            .map_err(|e| OrderError::Internal(format!("outbox 负载序列化失败: {e}")))?;

        self.publisher
            .publish(&record.topic, &record.partition_key, &payload)
            .await
            .map_err(|e| OrderError::Channel(e.to_string()))
    }

    /// 按退避释放记录
    ///
    /// 释放失败时记录保持租约，到期后自然重新可见，不影响本批其余记录。
    async fn defer(&self, record: &OutboxRecord, reason: &str) {
        let attempt = u32::try_from(record.attempts.saturating_sub(1)).unwrap_or(0);
        let delay = self.backoff.delay_for_attempt(attempt);
        let retry_at = Utc::now() + TimeDelta::from_std(delay).unwrap_or(TimeDelta::zero());

        warn!(
            outbox_id = record.id,
            order_id = record.order_id,
            attempts = record.attempts,
            retry_in_ms = delay.as_millis() as u64,
            reason,
            "outbox 记录发布失败，稍后重试"
        );

        if let Err(e) = self.outbox.release(record.id, reason, retry_at).await {
            error!(
                outbox_id = record.id,
                order_id = record.order_id,
                error = %e,
                "释放 outbox 记录失败，等待租约到期"
            );
        }
    }

    /// 运行分发循环，直到关闭信号变为 `true`
    ///
    /// 一轮领满批次时立即进入下一轮，否则等待轮询间隔。
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "outbox 分发器已启动"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let drained = match self.dispatch_once().await {
                Ok(stats) => stats.claimed < usize::try_from(self.batch_size).unwrap_or(0),
                Err(e) => {
                    error!(error = %e, "outbox 分发失败");
                    true
                }
            };

            if drained {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        // 发送端已释放，视为关闭
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!("outbox 分发器已停止");
    }
}
