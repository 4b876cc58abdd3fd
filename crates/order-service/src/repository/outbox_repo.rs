//! outbox 仓储（PostgreSQL）
//!
//! 领取使用 `FOR UPDATE SKIP LOCKED`，多个分发器实例可以并行工作而不互相阻塞。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::OutboxRepositoryTrait;
use crate::error::Result;
use crate::models::OutboxRecord;

pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepositoryTrait for OutboxRepository {
    async fn claim_batch(&self, limit: i64, lease: Duration) -> Result<Vec<OutboxRecord>> {
        let mut records = sqlx::query_as::<_, OutboxRecord>(
            r#"
            UPDATE order_outbox
            SET next_attempt_at = NOW() + make_interval(secs => $2),
                attempts = attempts + 1
            WHERE id IN (
                SELECT id
                FROM order_outbox
                WHERE published_at IS NULL AND next_attempt_at <= NOW()
                ORDER BY id
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, order_id, topic, partition_key, event_type, payload,
                      attempts, next_attempt_at, last_error, published_at, created_at
            "#,
        )
        .bind(limit)
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;

        // RETURNING 不保证顺序
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn mark_published(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE order_outbox
            SET published_at = NOW(), last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn release(&self, id: i64, error: &str, retry_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE order_outbox
            SET next_attempt_at = $2, last_error = $3
            WHERE id = $1 AND published_at IS NULL
            "#,
        )
        .bind(id)
        .bind(retry_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
