//! 仓储操作的错误处理
//!
//! 把 sqlx 错误连同操作类型与实体信息写入结构化日志，再转换为 `VerifierError`。
//! 唯一约束冲突转换为 `DatabaseOperation`，其余错误保留原始 sqlx 错误以便判断是否可重试。

use sqlx::Error as SqlxError;
use std::fmt;
use tracing::{error, warn};
use verifier_core::VerifierError;

/// Operation context for repository operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOperation {
    Create,
    Read,
    Update,
    Delete,
    Claim,
    BatchUpdate,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Delete => write!(f, "删除"),
            RepositoryOperation::Claim => write!(f, "领取"),
            RepositoryOperation::BatchUpdate => write!(f, "批量更新"),
        }
    }
}

pub fn database_error(
    operation: RepositoryOperation,
    entity: &str,
    entity_id: &str,
    error: SqlxError,
) -> VerifierError {
    match &error {
        SqlxError::Database(db_error) if db_error.is_unique_violation() => {
            let msg = format!("{operation}{entity} ({entity_id}) 时发生唯一约束冲突");
            warn!(error = %error, "{}", msg);
            VerifierError::DatabaseOperation(msg)
        }
        SqlxError::PoolTimedOut | SqlxError::PoolClosed => {
            warn!(error = %error, "{}{} ({}) 时数据库暂时不可用", operation, entity, entity_id);
            VerifierError::Database(error)
        }
        _ => {
            error!(error = %error, "{}{} ({}) 时发生数据库错误", operation, entity, entity_id);
            VerifierError::Database(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_stays_retryable() {
        let err = database_error(RepositoryOperation::Claim, "analysis_task", "-", SqlxError::PoolTimedOut);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_row_not_found_is_database_error() {
        let err = database_error(RepositoryOperation::Read, "analysis_task", "t1", SqlxError::RowNotFound);
        assert!(matches!(err, VerifierError::Database(SqlxError::RowNotFound)));
        assert!(!err.is_retryable());
    }
}
