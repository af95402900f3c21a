use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use verifier_core::models::{AnalysisTask, ClaimFilter, ExecutionStatus, TaskIdentity};
use verifier_core::traits::{ClaimCriteria, InsertOutcome, TaskQuery, TaskStore};
use verifier_core::{VerifierError, VerifierResult};

/// 内存分析任务仓储，按插入顺序保存
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<Vec<AnalysisTask>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<AnalysisTask> {
        self.tasks.read().await.clone()
    }

    /// 测试用：直接覆盖任务
    pub async fn put(&self, task: AnalysisTask) {
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => tasks.push(task),
        }
    }
}

fn latest_active<'a>(
    tasks: &'a [AnalysisTask],
    identity: &TaskIdentity,
    max_minute: i64,
) -> Option<&'a AnalysisTask> {
    tasks
        .iter()
        .filter(|t| t.is_active() && t.analysis_minute <= max_minute && identity.matches(t))
        .max_by_key(|t| (t.analysis_minute, t.last_updated_at))
}

fn claimable(task: &AnalysisTask, criteria: &ClaimCriteria, filter: &ClaimFilter) -> bool {
    let status_ok = match task.execution_status {
        ExecutionStatus::Queued => true,
        ExecutionStatus::Running => task.last_updated_at < criteria.stale_before,
        _ => false,
    };
    status_ok
        && task.version == criteria.version
        && task.retry <= criteria.max_retries
        && filter.accepts(task)
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &AnalysisTask) -> VerifierResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(VerifierError::DatabaseOperation(format!(
                "分析任务已存在: {}",
                task.id
            )));
        }
        tasks.push(task.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> VerifierResult<Option<AnalysisTask>> {
        Ok(self.tasks.read().await.iter().find(|t| t.id == id).cloned())
    }

    async fn find_latest_active(
        &self,
        identity: &TaskIdentity,
        max_minute: i64,
    ) -> VerifierResult<Option<AnalysisTask>> {
        let tasks = self.tasks.read().await;
        Ok(latest_active(&tasks, identity, max_minute).cloned())
    }

    async fn insert_if_absent(&self, task: &AnalysisTask) -> VerifierResult<InsertOutcome> {
        let mut tasks = self.tasks.write().await;
        let superseded = match latest_active(&tasks, &task.identity(), task.analysis_minute) {
            None => None,
            Some(previous) if task.supersedes(previous) => Some(previous.id.clone()),
            Some(previous) => return Ok(InsertOutcome::Blocked(previous.clone())),
        };
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(VerifierError::DatabaseOperation(format!(
                "分析任务已存在: {}",
                task.id
            )));
        }
        tasks.push(task.clone());
        Ok(InsertOutcome::Inserted { superseded })
    }

    async fn try_claim(
        &self,
        criteria: &ClaimCriteria,
        filter: &ClaimFilter,
    ) -> VerifierResult<Option<AnalysisTask>> {
        let mut tasks = self.tasks.write().await;
        let candidate = tasks
            .iter_mut()
            .enumerate()
            .filter(|(_, t)| claimable(t, criteria, filter))
            .min_by_key(|(index, t)| (t.priority, t.created_at, *index))
            .map(|(_, t)| t);

        Ok(candidate.map(|task| {
            task.execution_status = ExecutionStatus::Running;
            task.retry += 1;
            task.last_updated_at = criteria.now;
            debug!("领取分析任务: {} 重试次数 {}", task.id, task.retry);
            task.clone()
        }))
    }

    async fn update_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> VerifierResult<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) if task.execution_status != status => {
                task.execution_status = status;
                task.last_updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(VerifierError::TaskNotFound { id: id.to_string() }),
        }
    }

    async fn update_status_where(
        &self,
        query: &TaskQuery,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> VerifierResult<u64> {
        let mut tasks = self.tasks.write().await;
        let mut updated = 0;
        for task in tasks
            .iter_mut()
            .filter(|t| query.matches(t) && t.execution_status != status)
        {
            task.execution_status = status;
            task.last_updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn find(&self, query: &TaskQuery) -> VerifierResult<Vec<AnalysisTask>> {
        let tasks = self.tasks.read().await;
        let mut found: Vec<AnalysisTask> = tasks.iter().filter(|t| query.matches(t)).cloned().collect();
        found.sort_by(|a, b| b.last_updated_at.cmp(&a.last_updated_at));
        Ok(found)
    }

    async fn rename_state_execution(
        &self,
        id: &str,
        state_execution_id: &str,
        now: DateTime<Utc>,
    ) -> VerifierResult<bool> {
        let mut tasks = self.tasks.write().await;
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.state_execution_id = state_execution_id.to_string();
                task.last_updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
