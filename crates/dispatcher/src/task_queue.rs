use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use verifier_core::{
    config::AnalysisConfig,
    models::{
        AnalysisTask, ClaimFilter, ClusterLevel, ExecutionStatus, LearningEngineError,
        MLAnalysisType, MinuteMatch, ServiceApiVersion,
    },
    traits::{ClaimCriteria, InsertOutcome, TaskQuery, TaskStore, VerificationStateClient},
    VerifierError, VerifierResult,
};

use crate::metrics::VerifierMetrics;

/// 入队结果
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// 同一身份下没有活跃任务，新任务已写入
    Created(AnalysisTask),
    /// 已有排队、运行中或更新分钟的成功任务，新任务被丢弃
    AlreadyScheduled { existing_id: String },
    /// 更早分钟的任务已成功，新任务已写入
    Superseded {
        task: AnalysisTask,
        previous_id: String,
    },
}

impl EnqueueOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }

    /// 实际写入存储的任务
    pub fn inserted(&self) -> Option<&AnalysisTask> {
        match self {
            EnqueueOutcome::Created(task) | EnqueueOutcome::Superseded { task, .. } => Some(task),
            EnqueueOutcome::AlreadyScheduled { .. } => None,
        }
    }
}

/// 学习引擎分析任务队列
///
/// 没有进程内调度线程，所有互斥都依赖存储的原子领取。
/// 任意数量的工作进程可以并发调用 [`AnalysisTaskQueue::claim`]。
pub struct AnalysisTaskQueue {
    store: Arc<dyn TaskStore>,
    state_client: Arc<dyn VerificationStateClient>,
    config: AnalysisConfig,
    metrics: VerifierMetrics,
}

impl AnalysisTaskQueue {
    pub fn new(
        store: Arc<dyn TaskStore>,
        state_client: Arc<dyn VerificationStateClient>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            store,
            state_client,
            config,
            metrics: VerifierMetrics::new(),
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub async fn get(&self, task_id: &str) -> VerifierResult<Option<AnalysisTask>> {
        self.store.get(task_id).await
    }

    /// 入队新任务
    ///
    /// 同一身份下分钟不晚于新任务的活跃任务至多一个：
    /// 只有更早分钟的成功任务会被新任务取代，其余情况丢弃新任务。
    #[instrument(skip(self, task), fields(
        state_execution_id = %task.state_execution_id,
        minute = task.analysis_minute,
        task_type = %task.ml_analysis_type,
    ))]
    pub async fn enqueue(&self, mut task: AnalysisTask) -> VerifierResult<EnqueueOutcome> {
        let now = Utc::now();
        task.execution_status = ExecutionStatus::Queued;
        task.retry = 0;
        task.created_at = now;
        task.last_updated_at = now;

        match self.store.insert_if_absent(&task).await? {
            InsertOutcome::Blocked(previous) => {
                info!(
                    "分析任务已存在，丢弃重复入队: 已有任务 {} 分钟 {} 状态 {}",
                    previous.id, previous.analysis_minute, previous.execution_status
                );
                self.metrics.record_task_dropped();
                Ok(EnqueueOutcome::AlreadyScheduled {
                    existing_id: previous.id,
                })
            }
            InsertOutcome::Inserted { superseded: None } => {
                self.metrics.record_task_enqueued();
                info!("分析任务已入队: {}", task.id);
                Ok(EnqueueOutcome::Created(task))
            }
            InsertOutcome::Inserted {
                superseded: Some(previous_id),
            } => {
                self.metrics.record_task_enqueued();
                info!("分析任务 {} 已入队，取代已完成的任务 {}", task.id, previous_id);
                Ok(EnqueueOutcome::Superseded { task, previous_id })
            }
        }
    }

    /// 原子领取下一个任务
    ///
    /// 返回领取后的任务（RUNNING，重试次数已加一）。
    /// 领取后重试次数超过上限的任务直接置为FAILED，并通知所属验证状态。
    pub async fn claim(
        &self,
        version: ServiceApiVersion,
        filter: &ClaimFilter,
    ) -> VerifierResult<Option<AnalysisTask>> {
        let now = Utc::now();
        let criteria = ClaimCriteria {
            version,
            max_retries: self.config.max_retries,
            stale_before: now - self.config.lease_timeout(),
            now,
        };

        let Some(task) = self.store.try_claim(&criteria, filter).await? else {
            debug!("没有可领取的分析任务");
            return Ok(None);
        };

        if task.retry > self.config.max_retries {
            warn!(
                "分析任务 {} 已领取 {} 次，超过上限 {}，置为FAILED",
                task.id, task.retry, self.config.max_retries
            );
            self.store
                .update_status(&task.id, ExecutionStatus::Failed, now)
                .await?;
            self.metrics.record_task_failed();

            let error = LearningEngineError {
                analysis_minute: task.analysis_minute,
                error_msg: format!("分析任务超过最大重试次数 {}", self.config.max_retries),
            };
            self.state_client
                .notify_analysis_failure(&task.state_execution_id, &error)
                .await?;
            return Ok(None);
        }

        info!(
            "领取分析任务 {}: 执行 {} 分钟 {} 类型 {} 第 {} 次",
            task.id, task.state_execution_id, task.analysis_minute, task.ml_analysis_type, task.retry
        );
        self.metrics.record_task_claimed();
        Ok(Some(task))
    }

    /// 置为SUCCESS，重复调用无副作用
    pub async fn mark_completed(&self, task_id: &str) -> VerifierResult<bool> {
        let changed = self
            .store
            .update_status(task_id, ExecutionStatus::Success, Utc::now())
            .await?;
        if changed {
            info!("分析任务 {} 已完成", task_id);
        }
        Ok(changed)
    }

    /// 把匹配的排队或运行中任务置为SUCCESS，返回修改条数
    pub async fn mark_completed_for(
        &self,
        workflow_execution_id: Option<&str>,
        state_execution_id: &str,
        minute: i64,
        task_type: MLAnalysisType,
        level: ClusterLevel,
    ) -> VerifierResult<u64> {
        let query = TaskQuery {
            workflow_execution_id: workflow_execution_id.map(str::to_string),
            state_execution_id: Some(state_execution_id.to_string()),
            analysis_minute: Some(MinuteMatch::Exact(minute)),
            ml_analysis_type: Some(task_type),
            cluster_level: Some(level),
            statuses: vec![ExecutionStatus::Queued, ExecutionStatus::Running],
            ..TaskQuery::default()
        };
        let updated = self
            .store
            .update_status_where(&query, ExecutionStatus::Success, Utc::now())
            .await?;
        debug!(
            "标记 {} 分钟 {} 的 {}/{} 任务完成: {} 条",
            state_execution_id, minute, task_type, level, updated
        );
        Ok(updated)
    }

    /// 处理学习引擎上报的失败，返回任务的新状态
    pub async fn notify_failure(
        &self,
        task_id: &str,
        error: &LearningEngineError,
    ) -> VerifierResult<ExecutionStatus> {
        let task = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| VerifierError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        let now = Utc::now();
        if task.retry >= self.config.max_retries {
            warn!(
                "分析任务 {} 已用完 {} 次重试，置为FAILED: 分钟 {} 错误 {}",
                task.id, task.retry, error.analysis_minute, error.error_msg
            );
            self.store
                .update_status(task_id, ExecutionStatus::Failed, now)
                .await?;
            self.metrics.record_task_failed();
            self.state_client
                .notify_analysis_failure(&task.state_execution_id, error)
                .await?;
            return Ok(ExecutionStatus::Failed);
        }

        info!(
            "分析任务 {} 第 {} 次执行失败，重新排队: {}",
            task_id, task.retry, error.error_msg
        );
        self.store
            .update_status(task_id, ExecutionStatus::Queued, now)
            .await?;
        Ok(ExecutionStatus::Queued)
    }

    /// 是否有运行中的任务已用完重试次数
    pub async fn has_timed_out(
        &self,
        workflow_execution_id: &str,
        state_execution_id: &str,
    ) -> VerifierResult<bool> {
        let query = TaskQuery {
            workflow_execution_id: Some(workflow_execution_id.to_string()),
            state_execution_id: Some(state_execution_id.to_string()),
            statuses: vec![ExecutionStatus::Running],
            ..TaskQuery::default()
        };
        let tasks = self.store.find(&query).await?;
        Ok(tasks
            .iter()
            .any(|task| task.retry >= self.config.max_retries))
    }

    pub async fn is_task_running_or_queued(
        &self,
        cv_config_id: &str,
        since_minute: Option<i64>,
    ) -> VerifierResult<bool> {
        let query = TaskQuery {
            cv_config_id: Some(cv_config_id.to_string()),
            analysis_minute: since_minute.map(MinuteMatch::AtLeast),
            statuses: vec![ExecutionStatus::Queued, ExecutionStatus::Running],
            ..TaskQuery::default()
        };
        Ok(!self.store.find(&query).await?.is_empty())
    }

    /// 归档失败的任务
    ///
    /// FAILED或已用完重试的RUNNING任务改名为 `{id}-retry-{backoff}`，
    /// 腾出身份给新任务，同时作为退避调度的上一次尝试记录。
    #[instrument(skip(self))]
    pub async fn archive_failed(
        &self,
        state_execution_id: &str,
        minute: i64,
    ) -> VerifierResult<u64> {
        let query = TaskQuery {
            state_execution_id: Some(state_execution_id.to_string()),
            analysis_minute: Some(MinuteMatch::Exact(minute)),
            statuses: vec![ExecutionStatus::Failed, ExecutionStatus::Running],
            ..TaskQuery::default()
        };

        let mut archived = 0;
        for task in self.store.find(&query).await? {
            let exhausted = task.execution_status == ExecutionStatus::Failed
                || task.retry >= self.config.max_retries;
            if !exhausted {
                continue;
            }

            let retry_identity = task.retry_identity();
            if self
                .store
                .rename_state_execution(&task.id, &retry_identity, Utc::now())
                .await?
            {
                info!("失败任务 {} 已归档为 {}", task.id, retry_identity);
                archived += 1;
            }
        }
        Ok(archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_outcome_inserted() {
        let task = AnalysisTask::new("exec-1", 1, MLAnalysisType::LogMl);
        assert!(EnqueueOutcome::Created(task.clone()).is_created());

        let superseded = EnqueueOutcome::Superseded {
            task: task.clone(),
            previous_id: "old".to_string(),
        };
        assert!(!superseded.is_created());
        assert_eq!(superseded.inserted().map(|t| t.id.as_str()), Some(task.id.as_str()));

        let dropped = EnqueueOutcome::AlreadyScheduled {
            existing_id: "old".to_string(),
        };
        assert!(dropped.inserted().is_none());
    }
}
