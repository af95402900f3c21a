use thiserror::Error;

use crate::models::ClusterLevel;

/// 验证流水线错误类型定义
///
/// 屏障未就绪、退避未到期、重复入队、过期数据都不是错误，
/// 它们以结果值的形式返回给调用方。
#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("分析任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("分析上下文未找到: {id}")]
    ContextNotFound { id: String },

    #[error("非法的聚类级别迁移: {from} -> {to}")]
    InvalidLevelTransition { from: ClusterLevel, to: ClusterLevel },

    #[error("无效的数据记录: {0}")]
    InvalidRecord(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("验证状态服务错误: {0}")]
    StateClient(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for VerifierError {
    fn from(e: serde_json::Error) -> Self {
        VerifierError::Serialization(e.to_string())
    }
}

impl VerifierError {
    /// 存储暂时不可用，调用方可以原样重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerifierError::Database(sqlx::Error::PoolTimedOut)
                | VerifierError::Database(sqlx::Error::PoolClosed)
                | VerifierError::Database(sqlx::Error::Io(_))
                | VerifierError::DatabaseOperation(_)
        )
    }
}

/// 统一的Result类型
pub type VerifierResult<T> = std::result::Result<T, VerifierError>;
