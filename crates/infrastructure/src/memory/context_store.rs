use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use verifier_core::models::{AnalysisContext, ExecutionStatus};
use verifier_core::traits::{ClaimCriteria, ContextStore};
use verifier_core::{VerifierError, VerifierResult};

#[derive(Debug, Clone, Default)]
pub struct InMemoryContextStore {
    contexts: Arc<RwLock<Vec<AnalysisContext>>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn save(&self, context: &AnalysisContext) -> VerifierResult<()> {
        let mut contexts = self.contexts.write().await;
        match contexts.iter_mut().find(|c| c.id == context.id) {
            Some(existing) => *existing = context.clone(),
            None => contexts.push(context.clone()),
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> VerifierResult<Option<AnalysisContext>> {
        Ok(self.contexts.read().await.iter().find(|c| c.id == id).cloned())
    }

    async fn get_by_state_execution(
        &self,
        state_execution_id: &str,
    ) -> VerifierResult<Option<AnalysisContext>> {
        Ok(self
            .contexts
            .read()
            .await
            .iter()
            .find(|c| c.state_execution_id == state_execution_id)
            .cloned())
    }

    async fn try_claim(&self, criteria: &ClaimCriteria) -> VerifierResult<Option<AnalysisContext>> {
        let mut contexts = self.contexts.write().await;
        let candidate = contexts
            .iter_mut()
            .enumerate()
            .filter(|(_, c)| {
                let status_ok = match c.execution_status {
                    ExecutionStatus::Queued => true,
                    ExecutionStatus::Running => c.last_updated_at < criteria.stale_before,
                    _ => false,
                };
                status_ok && c.version == criteria.version && c.retry <= criteria.max_retries
            })
            .min_by_key(|(index, c)| (c.created_at, *index))
            .map(|(_, c)| c);

        Ok(candidate.map(|context| {
            context.execution_status = ExecutionStatus::Running;
            context.retry += 1;
            context.last_updated_at = criteria.now;
            context.clone()
        }))
    }

    async fn update_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> VerifierResult<bool> {
        let mut contexts = self.contexts.write().await;
        match contexts.iter_mut().find(|c| c.id == id) {
            Some(context) if context.execution_status != status => {
                context.execution_status = status;
                context.last_updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(VerifierError::ContextNotFound { id: id.to_string() }),
        }
    }
}
