//! 库存仓储（PostgreSQL）

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use super::check_decrement_quantity;
use super::traits::StockRepositoryTrait;
use crate::error::{InventoryError, Result};
use crate::models::{DecrementOutcome, ReconciliationStatus, Stock};

/// 库存仓储
pub struct StockRepository {
    pool: PgPool,
}

impl StockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 条件扣减，返回是否命中
    async fn conditional_decrement<'e, E>(executor: E, product_id: i64, quantity: i32) -> Result<bool>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE stock
            SET quantity = quantity - $2, updated_at = NOW()
            WHERE product_id = $1 AND quantity >= $2
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_outcome(
        tx: &mut Transaction<'_, Postgres>,
        order_id: i64,
        status: ReconciliationStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE reconciled_orders
            SET outcome = $2
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(status)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StockRepositoryTrait for StockRepository {
    async fn ensure(&self, product_id: i64, initial_quantity: i32) -> Result<()> {
        if initial_quantity < 0 {
            return Err(InventoryError::Validation(format!(
                "初始库存不能为负: {}",
                initial_quantity
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO stock (product_id, quantity)
            VALUES ($1, $2)
            ON CONFLICT (product_id) DO NOTHING
            "#,
        )
        .bind(product_id)
        .bind(initial_quantity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, product_id: i64) -> Result<Option<Stock>> {
        let stock = sqlx::query_as::<_, Stock>(
            r#"
            SELECT product_id, quantity, updated_at
            FROM stock
            WHERE product_id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(stock)
    }

    async fn decrement(&self, product_id: i64, quantity: i32) -> Result<DecrementOutcome> {
        check_decrement_quantity(quantity)?;
        if Self::conditional_decrement(&self.pool, product_id, quantity).await? {
            Ok(DecrementOutcome::Applied)
        } else {
            Ok(DecrementOutcome::InsufficientStock)
        }
    }

    async fn decrement_once(
        &self,
        order_id: i64,
        product_id: i64,
        quantity: i32,
    ) -> Result<DecrementOutcome> {
        check_decrement_quantity(quantity)?;
        let mut tx = self.pool.begin().await?;

        // 并发处理同一订单时，后到者在唯一键上等待先到者提交后命中冲突
        let claimed = sqlx::query(
            r#"
            INSERT INTO reconciled_orders (order_id, product_id, quantity, outcome)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(order_id)
        .bind(product_id)
        .bind(quantity)
        .bind(ReconciliationStatus::Applied)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !claimed {
            tx.rollback().await?;
            return Ok(DecrementOutcome::AlreadyApplied);
        }

        let outcome = if Self::conditional_decrement(&mut *tx, product_id, quantity).await? {
            DecrementOutcome::Applied
        } else {
            Self::record_outcome(&mut tx, order_id, ReconciliationStatus::InsufficientStock)
                .await?;
            DecrementOutcome::InsufficientStock
        };

        tx.commit().await?;
        Ok(outcome)
    }
}
