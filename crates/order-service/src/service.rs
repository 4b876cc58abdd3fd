//! 下单流程
//!
//! 校验请求、写入订单账本并发布订单创建事件。发布方式由 `PublishMode` 决定：
//!
//! - `Outbox`：订单行与事件行在同一事务中写入，由 `OutboxDispatcher` 异步投递
//! - `Direct`：写库成功后同步发布；发布失败只记录日志，调用方仍然得到成功

use std::sync::Arc;

use orderflow_shared::config::PublishMode;
use orderflow_shared::events::topics;
use orderflow_shared::kafka::EventPublisher;
use orderflow_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use crate::error::{OrderError, Result};
use crate::models::{NewOrder, Order};
use crate::repository::OrderRepositoryTrait;

/// 下单服务
pub struct OrderService {
    orders: Arc<dyn OrderRepositoryTrait>,
    publisher: Arc<dyn EventPublisher>,
    mode: PublishMode,
    topic: String,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepositoryTrait>,
        publisher: Arc<dyn EventPublisher>,
        mode: PublishMode,
    ) -> Self {
        Self {
            orders,
            publisher,
            mode,
            topic: topics::ORDER_CREATED.to_string(),
        }
    }

    /// 覆盖事件 topic
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// 创建订单
    ///
    /// - 数量非正时在触达存储之前返回 `Validation`
    /// - 写库失败返回 `Persistence`，不发布任何事件
    /// - 写库成功后发布失败仍返回成功
    #[instrument(skip(self), fields(mode = ?self.mode))]
    pub async fn create_order(&self, user_id: i64, product_id: i64, quantity: i32) -> Result<Order> {
        if quantity <= 0 {
            return Err(OrderError::Validation(format!(
                "quantity 必须为正数，实际为 {}",
                quantity
            )));
        }

        let new_order = NewOrder {
            user_id,
            product_id,
            quantity,
        };

        let order = match self.mode {
            PublishMode::Outbox => self.orders.create_with_event(&new_order, &self.topic).await,
            PublishMode::Direct => self.orders.create(&new_order).await,
        }
        .inspect_err(|e| {
            error!(user_id, product_id, error = %e, "订单写入失败");
        })?;

        metrics::record_order_created(self.mode_label());

        match self.mode {
            PublishMode::Outbox => {
                info!(order_id = order.id, "订单已创建，事件已写入 outbox");
            }
            PublishMode::Direct => self.publish_direct(&order).await,
        }

        Ok(order)
    }

    /// 同步发布订单事件，失败时只记录日志
    ///
    /// 此时订单已落库但事件丢失，库存不会为该订单调整。
    async fn publish_direct(&self, order: &Order) {
        let event = order.to_event();
        let result = match event.to_bytes() {
            Ok(payload) => {
                self.publisher
                    .publish(&self.topic, &event.partition_key(), &payload)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                metrics::record_event_published("success");
                info!(order_id = order.id, "订单已创建，事件已发布");
            }
            Err(e) => {
                metrics::record_event_published("failure");
                warn!(
                    order_id = order.id,
                    product_id = order.product_id,
                    error = %e,
                    "订单已创建但事件发布失败，库存不会为该订单调整"
                );
            }
        }
    }

    /// 查询调用方自己的订单，他人的订单同样视为不存在
    pub async fn get_order(&self, user_id: i64, order_id: i64) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .filter(|order| order.user_id == user_id)
            .ok_or(OrderError::NotFound(order_id))
    }

    fn mode_label(&self) -> &'static str {
        match self.mode {
            PublishMode::Direct => "direct",
            PublishMode::Outbox => "outbox",
        }
    }
}
