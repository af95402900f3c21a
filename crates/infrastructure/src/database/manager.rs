use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};
use verifier_core::config::DatabaseConfig;
use verifier_core::models::{LogDataRecord, MetricDataRecord};
use verifier_core::traits::{AnalysisRecordStore, ContextStore, RecordStore, TaskStore};
use verifier_core::{VerifierError, VerifierResult};

use super::migrations::run_migrations;
use super::sqlite::{
    SqliteAnalysisRecordStore, SqliteContextStore, SqliteRecordStore, SqliteTaskStore,
};

/// SQLite数据库管理器：连接池、迁移与仓储工厂
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> VerifierResult<Self> {
        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");

        let mut connect_options = SqliteConnectOptions::from_str(&config.url)
            .map_err(VerifierError::Database)?
            .create_if_missing(true);
        if !in_memory {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }

        // 内存数据库每个连接都是独立的库，只能使用单连接
        let max_connections = if in_memory { 1 } else { config.max_connections };
        let min_connections = config.min_connections.min(max_connections);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .connect_with(connect_options)
            .await
            .map_err(VerifierError::Database)?;

        debug!("SQLite连接池已建立: {}", config.url);
        Ok(Self { pool })
    }

    /// 内存数据库，并完成迁移
    pub async fn in_memory() -> VerifierResult<Self> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        let manager = Self::new(&config).await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> VerifierResult<()> {
        run_migrations(&self.pool).await?;
        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> VerifierResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(VerifierError::Database)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn task_store(&self) -> Arc<dyn TaskStore> {
        Arc::new(SqliteTaskStore::new(self.pool.clone()))
    }

    pub fn log_store(&self) -> Arc<dyn RecordStore<LogDataRecord>> {
        Arc::new(SqliteRecordStore::<LogDataRecord>::new(self.pool.clone()))
    }

    pub fn metric_store(&self) -> Arc<dyn RecordStore<MetricDataRecord>> {
        Arc::new(SqliteRecordStore::<MetricDataRecord>::new(self.pool.clone()))
    }

    pub fn context_store(&self) -> Arc<dyn ContextStore> {
        Arc::new(SqliteContextStore::new(self.pool.clone()))
    }

    pub fn analysis_record_store(&self) -> Arc<dyn AnalysisRecordStore> {
        Arc::new(SqliteAnalysisRecordStore::new(self.pool.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_migrates_twice() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.health_check().await.unwrap();
        // 迁移可重复执行
        manager.migrate().await.unwrap();
        manager.close().await;
    }
}
