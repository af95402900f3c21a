//! 外部协作方的测试替身

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use verifier_core::models::{AnalysisRecord, LearningEngineError};
use verifier_core::traits::VerificationStateClient;
use verifier_core::VerifierResult;

/// 记录所有调用的验证状态服务
#[derive(Debug, Clone, Default)]
pub struct RecordingStateClient {
    invalid_states: Arc<Mutex<BTreeSet<String>>>,
    failures: Arc<Mutex<Vec<(String, LearningEngineError)>>>,
    alerts: Arc<Mutex<Vec<AnalysisRecord>>>,
}

impl RecordingStateClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把某个验证状态标记为已失效
    pub fn invalidate(&self, state_execution_id: &str) {
        self.invalid_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state_execution_id.to_string());
    }

    pub fn failures(&self) -> Vec<(String, LearningEngineError)> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn alerts(&self) -> Vec<AnalysisRecord> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VerificationStateClient for RecordingStateClient {
    async fn is_state_valid(&self, state_execution_id: &str) -> VerifierResult<bool> {
        Ok(!self
            .invalid_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(state_execution_id))
    }

    async fn notify_analysis_failure(
        &self,
        state_execution_id: &str,
        error: &LearningEngineError,
    ) -> VerifierResult<()> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((state_execution_id.to_string(), error.clone()));
        Ok(())
    }

    async fn trigger_alert_if_necessary(&self, record: &AnalysisRecord) -> VerifierResult<()> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
