//! 下单到库存扣减的端到端流程测试
//!
//! 订单服务与库存服务均使用内存实现，事件通道由 `RecordingPublisher` 代替：
//! 发布出的消息按顺序交给对账器处理，等价于一个单分区的消费者。

use std::sync::Arc;
use std::time::Duration;

use inventory_service::{
    DropReason, InMemoryStockRepository, InventoryReconciler, ReconcileOutcome,
    StockRepositoryTrait,
};
use order_service::{InMemoryOrderRepository, OrderError, OrderService, OutboxDispatcher};
use orderflow_shared::config::{OrdersConfig, PublishMode};
use orderflow_shared::events::topics;
use orderflow_shared::retry::RetryPolicy;
use orderflow_shared::test_utils::RecordingPublisher;

const PRODUCT_ID: i64 = 123;

struct Pipeline {
    orders: Arc<InMemoryOrderRepository>,
    channel: RecordingPublisher,
    service: OrderService,
    stock: Arc<InMemoryStockRepository>,
    reconciler: InventoryReconciler,
}

impl Pipeline {
    async fn new(mode: PublishMode, dedup_enabled: bool, initial: i32) -> Self {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let channel = RecordingPublisher::new();
        let service = OrderService::new(orders.clone(), Arc::new(channel.clone()), mode);

        let stock = Arc::new(InMemoryStockRepository::new());
        stock.ensure(PRODUCT_ID, initial).await.unwrap();
        let reconciler = InventoryReconciler::new(stock.clone(), dedup_enabled);

        Self {
            orders,
            channel,
            service,
            stock,
            reconciler,
        }
    }

    fn dispatcher(&self) -> OutboxDispatcher {
        OutboxDispatcher::new(
            self.orders.clone(),
            Arc::new(self.channel.clone()),
            &OrdersConfig::default(),
        )
        .with_backoff(RetryPolicy::unbounded(Duration::ZERO, Duration::ZERO))
    }

    /// 把通道中的消息全部交给对账器
    async fn drain(&self) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        for message in self.channel.take() {
            assert_eq!(message.topic, topics::ORDER_CREATED);
            outcomes.push(self.reconciler.handle(&message.payload).await);
        }
        outcomes
    }

    fn quantity(&self) -> i32 {
        self.stock.quantity(PRODUCT_ID).unwrap()
    }
}

#[tokio::test]
async fn test_direct_mode_order_decrements_stock() {
    let pipeline = Pipeline::new(PublishMode::Direct, true, 100).await;

    let order = pipeline.service.create_order(1, PRODUCT_ID, 30).await.unwrap();

    let published = pipeline.channel.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, PRODUCT_ID.to_string());
    let event = published[0].as_order_event().unwrap();
    assert_eq!(event.order_id, order.id);
    assert_eq!(event.quantity, 30);

    let outcomes = pipeline.drain().await;
    assert_eq!(
        outcomes,
        vec![ReconcileOutcome::Applied {
            order_id: order.id,
            product_id: PRODUCT_ID,
            quantity: 30
        }]
    );
    assert_eq!(pipeline.quantity(), 70);
}

#[tokio::test]
async fn test_outbox_mode_order_decrements_after_dispatch() {
    let pipeline = Pipeline::new(PublishMode::Outbox, true, 100).await;

    pipeline.service.create_order(1, PRODUCT_ID, 30).await.unwrap();
    assert!(pipeline.channel.is_empty());
    assert_eq!(pipeline.orders.pending_outbox(), 1);

    let stats = pipeline.dispatcher().dispatch_once().await.unwrap();
    assert_eq!(stats.published, 1);
    assert_eq!(pipeline.orders.pending_outbox(), 0);

    pipeline.drain().await;
    assert_eq!(pipeline.quantity(), 70);
}

#[tokio::test]
async fn test_insufficient_stock_leaves_stock_unchanged() {
    let pipeline = Pipeline::new(PublishMode::Direct, true, 5).await;

    pipeline.service.create_order(1, PRODUCT_ID, 10).await.unwrap();

    assert_eq!(
        pipeline.drain().await,
        vec![ReconcileOutcome::Dropped {
            reason: DropReason::InsufficientStock
        }]
    );
    assert_eq!(pipeline.quantity(), 5);
}

#[tokio::test]
async fn test_invalid_quantity_never_reaches_storage_or_channel() {
    let pipeline = Pipeline::new(PublishMode::Direct, true, 100).await;

    for quantity in [0, -3] {
        let err = pipeline
            .service
            .create_order(1, PRODUCT_ID, quantity)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)));
    }

    assert!(pipeline.orders.orders().is_empty());
    assert!(pipeline.channel.is_empty());
    assert_eq!(pipeline.quantity(), 100);
}

#[tokio::test]
async fn test_direct_mode_publish_failure_loses_adjustment() {
    let pipeline = Pipeline::new(PublishMode::Direct, true, 100).await;
    pipeline.channel.set_failing(true);

    // 写库成功后发布失败，调用方仍看到成功
    let order = pipeline.service.create_order(1, PRODUCT_ID, 30).await.unwrap();
    assert_eq!(pipeline.orders.orders().len(), 1);
    assert_eq!(pipeline.orders.orders()[0].id, order.id);

    pipeline.channel.set_failing(false);
    assert!(pipeline.drain().await.is_empty());
    assert_eq!(pipeline.quantity(), 100);
}

#[tokio::test]
async fn test_outbox_mode_publish_failure_is_retried() {
    let pipeline = Pipeline::new(PublishMode::Outbox, true, 100).await;
    let dispatcher = pipeline.dispatcher();

    pipeline.service.create_order(1, PRODUCT_ID, 30).await.unwrap();

    pipeline.channel.set_failing(true);
    let stats = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(pipeline.orders.pending_outbox(), 1);

    pipeline.channel.set_failing(false);
    let stats = dispatcher.dispatch_once().await.unwrap();
    assert_eq!(stats.published, 1);

    pipeline.drain().await;
    assert_eq!(pipeline.quantity(), 70);
}

#[tokio::test]
async fn test_persistence_failure_publishes_nothing() {
    for mode in [PublishMode::Direct, PublishMode::Outbox] {
        let pipeline = Pipeline::new(mode, true, 100).await;
        pipeline.orders.set_fail_writes(true);

        let err = pipeline
            .service
            .create_order(1, PRODUCT_ID, 30)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Persistence(_)));

        assert_eq!(pipeline.orders.pending_outbox(), 0);
        let stats = pipeline.dispatcher().dispatch_once().await.unwrap();
        assert_eq!(stats.claimed, 0);
        assert!(pipeline.channel.is_empty());
        assert_eq!(pipeline.quantity(), 100);
    }
}

#[tokio::test]
async fn test_redelivery_without_dedup_decrements_twice() {
    let pipeline = Pipeline::new(PublishMode::Direct, false, 100).await;
    pipeline.service.create_order(1, PRODUCT_ID, 30).await.unwrap();

    let message = pipeline.channel.take().remove(0);
    pipeline.reconciler.handle(&message.payload).await;
    pipeline.reconciler.handle(&message.payload).await;

    assert_eq!(pipeline.quantity(), 40);
}

#[tokio::test]
async fn test_redelivery_with_dedup_decrements_once() {
    let pipeline = Pipeline::new(PublishMode::Direct, true, 100).await;
    pipeline.service.create_order(1, PRODUCT_ID, 30).await.unwrap();

    let message = pipeline.channel.take().remove(0);
    pipeline.reconciler.handle(&message.payload).await;
    let second = pipeline.reconciler.handle(&message.payload).await;

    assert_eq!(
        second,
        ReconcileOutcome::Dropped {
            reason: DropReason::AlreadyApplied
        }
    );
    assert_eq!(pipeline.quantity(), 70);
}

#[tokio::test]
async fn test_sequential_orders_stop_at_zero() {
    let pipeline = Pipeline::new(PublishMode::Outbox, true, 100).await;

    for _ in 0..4 {
        pipeline.service.create_order(1, PRODUCT_ID, 30).await.unwrap();
    }
    pipeline.dispatcher().dispatch_once().await.unwrap();

    let outcomes = pipeline.drain().await;
    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, ReconcileOutcome::Applied { .. }))
        .count();

    assert_eq!(outcomes.len(), 4);
    assert_eq!(applied, 3);
    assert_eq!(pipeline.quantity(), 10);
}

#[tokio::test]
async fn test_storage_outage_defers_until_recovery() {
    let pipeline = Pipeline::new(PublishMode::Direct, true, 100).await;
    pipeline.service.create_order(1, PRODUCT_ID, 30).await.unwrap();
    let message = pipeline.channel.take().remove(0);

    pipeline.stock.set_unavailable(true);
    let outcome = pipeline.reconciler.handle(&message.payload).await;
    assert!(!outcome.commits_offset());

    pipeline.stock.set_unavailable(false);
    let outcome = pipeline.reconciler.handle(&message.payload).await;
    assert!(outcome.commits_offset());
    assert_eq!(pipeline.quantity(), 70);
}
