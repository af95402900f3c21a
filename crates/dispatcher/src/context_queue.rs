use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use verifier_core::{
    config::AnalysisConfig,
    models::{AnalysisContext, ExecutionStatus, ServiceApiVersion},
    traits::{ClaimCriteria, ContextStore},
    VerifierResult,
};

/// 按验证执行粒度领取的分析上下文
pub struct AnalysisContextService {
    store: Arc<dyn ContextStore>,
    config: AnalysisConfig,
}

impl AnalysisContextService {
    pub fn new(store: Arc<dyn ContextStore>, config: AnalysisConfig) -> Self {
        Self { store, config }
    }

    pub async fn save(&self, context: &AnalysisContext) -> VerifierResult<()> {
        self.store.save(context).await?;
        info!(
            "分析上下文已保存: {} 执行 {}",
            context.id, context.state_execution_id
        );
        Ok(())
    }

    pub async fn get(&self, id: &str) -> VerifierResult<Option<AnalysisContext>> {
        self.store.get(id).await
    }

    pub async fn get_by_state_execution(
        &self,
        state_execution_id: &str,
    ) -> VerifierResult<Option<AnalysisContext>> {
        self.store.get_by_state_execution(state_execution_id).await
    }

    /// 领取规则与分析任务相同，超过重试上限的上下文置为FAILED
    pub async fn get_next(
        &self,
        version: ServiceApiVersion,
    ) -> VerifierResult<Option<AnalysisContext>> {
        let now = Utc::now();
        let criteria = ClaimCriteria {
            version,
            max_retries: self.config.max_retries,
            stale_before: now - self.config.lease_timeout(),
            now,
        };

        let Some(context) = self.store.try_claim(&criteria).await? else {
            return Ok(None);
        };

        if context.retry > self.config.max_retries {
            warn!(
                "分析上下文 {} 已领取 {} 次，置为FAILED",
                context.id, context.retry
            );
            self.store
                .update_status(&context.id, ExecutionStatus::Failed, now)
                .await?;
            return Ok(None);
        }

        info!(
            "领取分析上下文 {}: 执行 {} 第 {} 次",
            context.id, context.state_execution_id, context.retry
        );
        Ok(Some(context))
    }

    pub async fn mark_job_status(&self, id: &str, status: ExecutionStatus) -> VerifierResult<bool> {
        let changed = self.store.update_status(id, status, Utc::now()).await?;
        if changed {
            info!("分析上下文 {} 状态更新为 {}", id, status);
        }
        Ok(changed)
    }
}
