use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::{AnalysisRecord, LearningEngineError};
use crate::VerifierResult;

/// 验证状态服务接口
///
/// 由部署编排方实现：判断验证状态是否仍在运行，接收分析失败通知，
/// 以及在分析结果写入后评估是否需要告警。
#[async_trait]
pub trait VerificationStateClient: Send + Sync {
    /// 状态不再有效时，数据采集方应停止上报
    async fn is_state_valid(&self, state_execution_id: &str) -> VerifierResult<bool>;

    async fn notify_analysis_failure(
        &self,
        state_execution_id: &str,
        error: &LearningEngineError,
    ) -> VerifierResult<()>;

    async fn trigger_alert_if_necessary(&self, record: &AnalysisRecord) -> VerifierResult<()>;
}

/// 默认实现：所有状态视为有效，通知只写日志
#[derive(Debug, Clone, Default)]
pub struct LoggingStateClient;

#[async_trait]
impl VerificationStateClient for LoggingStateClient {
    async fn is_state_valid(&self, _state_execution_id: &str) -> VerifierResult<bool> {
        Ok(true)
    }

    async fn notify_analysis_failure(
        &self,
        state_execution_id: &str,
        error: &LearningEngineError,
    ) -> VerifierResult<()> {
        warn!(
            "验证状态 {} 在分钟 {} 分析失败: {}",
            state_execution_id, error.analysis_minute, error.error_msg
        );
        Ok(())
    }

    async fn trigger_alert_if_necessary(&self, record: &AnalysisRecord) -> VerifierResult<()> {
        info!(
            "分析结果已写入: {} 分钟 {} 类型 {}",
            record.identity, record.analysis_minute, record.ml_analysis_type
        );
        Ok(())
    }
}
