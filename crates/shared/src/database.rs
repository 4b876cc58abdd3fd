//! PostgreSQL 连接池
//!
//! 订单服务与库存服务各自持有独立的库，共用这里的建池与迁移逻辑。

use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// 连接池句柄，克隆开销为一次引用计数
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池
    ///
    /// 启动阶段连不上库属于致命错误，由调用方终止进程。
    #[instrument(skip_all, fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("数据库连接池已建立");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 执行服务自带的迁移（`sqlx::migrate!` 嵌入）
    #[instrument(skip_all)]
    pub async fn run_migrations(&self, migrator: &Migrator) -> Result<()> {
        migrator.run(&self.pool).await?;
        info!(count = migrator.iter().count(), "数据库迁移已完成");
        Ok(())
    }

    /// 就绪探针使用
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "需要 PostgreSQL"]
    async fn test_connect_and_ping() {
        let db = Database::connect(&crate::test_utils::test_database_config())
            .await
            .unwrap();
        db.health_check().await.unwrap();
        db.close().await;
    }
}
