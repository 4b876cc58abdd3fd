//! 库存对账
//!
//! 对单条订单事件执行一次条件扣减，并给出消息位点的处置结论：
//! - `Applied`：已扣减，提交位点
//! - `Dropped`：坏消息或业务上无法满足，记录后提交位点，不再重试
//! - `Deferred`：库存账本暂时不可用，不提交位点，退避后重新投递

use std::sync::Arc;
use std::time::Instant;

use orderflow_shared::events::OrderEvent;
use orderflow_shared::observability::metrics;
use tracing::{error, info, instrument, warn};

use crate::models::DecrementOutcome;
use crate::repository::StockRepositoryTrait;

/// 消息被丢弃的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// 无法解析为订单事件
    Malformed(String),
    /// 数量非正
    InvalidQuantity,
    /// 库存不足或商品未入库
    InsufficientStock,
    /// 该订单此前已对账
    AlreadyApplied,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::InvalidQuantity => "invalid_quantity",
            Self::InsufficientStock => "insufficient_stock",
            Self::AlreadyApplied => "already_applied",
        }
    }
}

/// 单条消息的对账结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        order_id: i64,
        product_id: i64,
        quantity: i32,
    },
    Dropped {
        reason: DropReason,
    },
    Deferred {
        error: String,
    },
}

impl ReconcileOutcome {
    /// 是否应提交该消息的位点
    pub fn commits_offset(&self) -> bool {
        !matches!(self, Self::Deferred { .. })
    }

    /// 指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Dropped { .. } => "dropped",
            Self::Deferred { .. } => "deferred",
        }
    }

    /// 丢弃原因标签，非丢弃结果为 `"none"`
    pub fn reason_label(&self) -> &'static str {
        match self {
            Self::Dropped { reason } => reason.as_str(),
            _ => "none",
        }
    }
}

/// 库存对账器
pub struct InventoryReconciler {
    stock: Arc<dyn StockRepositoryTrait>,
    dedup_enabled: bool,
}

impl InventoryReconciler {
    /// `dedup_enabled` 为 false 时退化为按消息扣减，重复投递会重复扣减
    pub fn new(stock: Arc<dyn StockRepositoryTrait>, dedup_enabled: bool) -> Self {
        Self {
            stock,
            dedup_enabled,
        }
    }

    pub fn dedup_enabled(&self) -> bool {
        self.dedup_enabled
    }

    /// 处理一条原始消息
    ///
    /// 不会返回错误：任何存储层失败都归为 `Deferred`，由调用方决定重投时机。
    #[instrument(skip(self, raw), fields(len = raw.len()))]
    pub async fn handle(&self, raw: &[u8]) -> ReconcileOutcome {
        let started = Instant::now();
        let outcome = self.reconcile(raw).await;
        metrics::record_reconciler_message(
            outcome.label(),
            outcome.reason_label(),
            started.elapsed().as_secs_f64(),
        );
        outcome
    }

    async fn reconcile(&self, raw: &[u8]) -> ReconcileOutcome {
        let event = match OrderEvent::from_slice(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "订单事件无法解析，丢弃");
                return ReconcileOutcome::Dropped {
                    reason: DropReason::Malformed(e.to_string()),
                };
            }
        };

        if let Err(e) = event.validate() {
            warn!(order_id = event.order_id, error = %e, "订单事件数量非法，丢弃");
            return ReconcileOutcome::Dropped {
                reason: DropReason::InvalidQuantity,
            };
        }

        let result = if self.dedup_enabled {
            self.stock
                .decrement_once(event.order_id, event.product_id, event.quantity)
                .await
        } else {
            self.stock
                .decrement(event.product_id, event.quantity)
                .await
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    order_id = event.order_id,
                    product_id = event.product_id,
                    error = %e,
                    "库存账本不可用，延迟处理"
                );
                return ReconcileOutcome::Deferred {
                    error: e.to_string(),
                };
            }
        };

        metrics::record_stock_decrement(outcome.as_str());

        match outcome {
            DecrementOutcome::Applied => {
                info!(
                    order_id = event.order_id,
                    product_id = event.product_id,
                    quantity = event.quantity,
                    "库存已扣减"
                );
                self.observe_quantity(event.product_id).await;
                ReconcileOutcome::Applied {
                    order_id: event.order_id,
                    product_id: event.product_id,
                    quantity: event.quantity,
                }
            }
            DecrementOutcome::InsufficientStock => {
                self.log_rejection(&event).await;
                ReconcileOutcome::Dropped {
                    reason: DropReason::InsufficientStock,
                }
            }
            DecrementOutcome::AlreadyApplied => {
                info!(order_id = event.order_id, "订单已对账，忽略重复投递");
                ReconcileOutcome::Dropped {
                    reason: DropReason::AlreadyApplied,
                }
            }
        }
    }

    /// 区分库存不足与商品未入库，两者都不改变库存
    async fn log_rejection(&self, event: &OrderEvent) {
        match self.stock.get(event.product_id).await {
            Ok(Some(stock)) => warn!(
                order_id = event.order_id,
                product_id = event.product_id,
                requested = event.quantity,
                available = stock.quantity,
                "库存不足，订单未扣减"
            ),
            Ok(None) => warn!(
                order_id = event.order_id,
                product_id = event.product_id,
                "商品未入库，订单未扣减"
            ),
            Err(e) => warn!(
                order_id = event.order_id,
                product_id = event.product_id,
                error = %e,
                "库存不足，订单未扣减"
            ),
        }
    }

    async fn observe_quantity(&self, product_id: i64) {
        if let Ok(Some(stock)) = self.stock.get(product_id).await {
            metrics::set_stock_quantity(product_id, stock.quantity);
        }
    }
}
