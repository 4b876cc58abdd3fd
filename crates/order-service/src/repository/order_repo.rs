//! 订单账本仓储（PostgreSQL）

use async_trait::async_trait;
use orderflow_shared::events::ORDER_CREATED_EVENT_TYPE;
use sqlx::PgPool;

use super::traits::OrderRepositoryTrait;
use crate::error::{OrderError, Result};
use crate::models::{NewOrder, Order, OrderStatus};

/// 订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn insert_query<'q>(
        order: &NewOrder,
    ) -> sqlx::query::QueryAs<'q, sqlx::Postgres, Order, sqlx::postgres::PgArguments> {
        sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (user_id, product_id, quantity, status)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, product_id, quantity, status, created_at
            "#,
        )
        .bind(order.user_id)
        .bind(order.product_id)
        .bind(order.quantity)
        .bind(OrderStatus::Pending)
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn create(&self, order: &NewOrder) -> Result<Order> {
        let created = Self::insert_query(order).fetch_one(&self.pool).await?;
        Ok(created)
    }

    async fn create_with_event(&self, order: &NewOrder, topic: &str) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let created = Self::insert_query(order).fetch_one(&mut *tx).await?;

        let event = created.to_event();
        let payload = serde_json::to_value(&event)
            .map_err(|e| OrderError::Internal(format!("订单事件序列化失败: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO order_outbox (order_id, topic, partition_key, event_type, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(created.id)
        .bind(topic)
        .bind(event.partition_key())
        .bind(ORDER_CREATED_EVENT_TYPE)
        .bind(payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(created)
    }

    async fn get(&self, id: i64) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, product_id, quantity, status, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }
}
