//! 数据采集方与学习引擎的入口
//!
//! 数据上报在请求处理中同步触发写入与级别推进，没有定时循环。

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use verifier_core::{
    models::{
        AnalysisRecord, ClusterLevel, ExecutionStatus, LearningEngineError, LevelRecord,
        LogDataRecord, LogElement, MLAnalysisType, MetricDataRecord, MinuteMatch, RecordFilter,
        RecordIdentity,
    },
    traits::{AnalysisRecordStore, VerificationStateClient},
    VerifierError, VerifierResult,
};

use crate::cluster_advancer::{LogLevelAdvancer, MetricLevelAdvancer};
use crate::metrics::VerifierMetrics;
use crate::task_queue::AnalysisTaskQueue;

/// 一批日志上报
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub identity: RecordIdentity,
    pub workflow_execution_id: Option<String>,
    pub host: Option<String>,
    pub level: ClusterLevel,
    pub delegate_task_id: Option<String>,
    pub elements: Vec<LogElement>,
}

impl IngestRequest {
    pub fn new(identity: RecordIdentity, level: ClusterLevel, elements: Vec<LogElement>) -> Self {
        Self {
            identity,
            workflow_execution_id: None,
            host: None,
            level,
            delegate_task_id: None,
            elements,
        }
    }
}

/// 上报结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 验证状态已失效或批次不完整，采集方应停止上报
    Rejected,
    Accepted { inserted: u64 },
    /// 该分钟已聚类，什么都没写
    AlreadyClustered,
    /// 该分钟已处理完成，什么都没写
    Stale,
}

pub type TaskResult = Result<AnalysisRecord, LearningEngineError>;

pub struct IngestionService {
    state_client: Arc<dyn VerificationStateClient>,
    task_queue: Arc<AnalysisTaskQueue>,
    logs: Arc<LogLevelAdvancer>,
    metric_track: Arc<MetricLevelAdvancer>,
    analysis_records: Arc<dyn AnalysisRecordStore>,
    metrics: VerifierMetrics,
}

impl IngestionService {
    pub fn new(
        state_client: Arc<dyn VerificationStateClient>,
        task_queue: Arc<AnalysisTaskQueue>,
        logs: Arc<LogLevelAdvancer>,
        metric_track: Arc<MetricLevelAdvancer>,
        analysis_records: Arc<dyn AnalysisRecordStore>,
    ) -> Self {
        Self {
            state_client,
            task_queue,
            logs,
            metric_track,
            analysis_records,
            metrics: VerifierMetrics::new(),
        }
    }

    async fn is_valid(&self, identity: &RecordIdentity) -> VerifierResult<bool> {
        match identity {
            RecordIdentity::StateExecution(id) => self.state_client.is_state_valid(id).await,
            RecordIdentity::CvConfig(_) => Ok(true),
        }
    }

    /// 日志上报
    ///
    /// L1批次把对应主机的心跳推进到H1并删除其L0记录；
    /// L2批次把所有主机的心跳推进到H2并删除L1记录。
    #[instrument(skip(self, request), fields(
        identity = %request.identity,
        level = %request.level,
        delegate_task_id = ?request.delegate_task_id,
    ))]
    pub async fn ingest_logs(&self, request: IngestRequest) -> VerifierResult<IngestOutcome> {
        let identity = &request.identity;
        if !self.is_valid(identity).await? {
            warn!("验证状态 {} 已失效，拒绝日志上报", identity);
            self.metrics.record_ingest_rejected();
            return Ok(IngestOutcome::Rejected);
        }

        let Some(batch_minute) = request
            .elements
            .iter()
            .map(|e| e.log_collection_minute)
            .max()
        else {
            return Ok(IngestOutcome::Accepted { inserted: 0 });
        };

        if !matches!(
            request.level,
            ClusterLevel::L0 | ClusterLevel::L1 | ClusterLevel::L2
        ) {
            return Err(VerifierError::InvalidRecord(format!(
                "日志只能上报到数据级别，收到 {}",
                request.level
            )));
        }

        let has_heartbeat = request.elements.iter().any(LogElement::is_heartbeat);
        if request.level == ClusterLevel::L0 && !has_heartbeat {
            warn!("{} 的L0批次没有心跳记录，拒绝上报", identity);
            self.metrics.record_ingest_rejected();
            return Ok(IngestOutcome::Rejected);
        }

        let slots = batch_slots(&request.elements);
        if self.already_clustered(identity, request.level, &slots).await? {
            info!("{} 分钟 {} 已聚类，忽略上报", identity, batch_minute);
            return Ok(IngestOutcome::AlreadyClustered);
        }

        if let Some(last) = self.logs.last_processed_minute(identity).await? {
            if batch_minute <= last {
                info!(
                    "{} 分钟 {} 不晚于已处理的分钟 {}，丢弃过期数据",
                    identity, batch_minute, last
                );
                return Ok(IngestOutcome::Stale);
            }
        }

        let records: Vec<LogDataRecord> = request
            .elements
            .iter()
            .map(|element| LogDataRecord::from_element(identity, request.level, element))
            .collect();
        let inserted = self.logs.record_ingested(&records).await?;

        let state_execution_id = identity.task_state_execution_id();
        match request.level {
            ClusterLevel::L1 => {
                for (host, minute) in &slots {
                    self.logs
                        .promote(
                            identity,
                            *minute,
                            ClusterLevel::L0,
                            ClusterLevel::L1,
                            Some(host.as_str()),
                        )
                        .await?;
                    self.task_queue
                        .mark_completed_for(
                            request.workflow_execution_id.as_deref(),
                            &state_execution_id,
                            *minute,
                            MLAnalysisType::LogCluster,
                            ClusterLevel::L1,
                        )
                        .await?;
                }
            }
            ClusterLevel::L2 => {
                let minutes: BTreeSet<i64> = slots.iter().map(|(_, minute)| *minute).collect();
                for minute in minutes {
                    self.logs
                        .promote(identity, minute, ClusterLevel::L1, ClusterLevel::L2, None)
                        .await?;
                    self.task_queue
                        .mark_completed_for(
                            request.workflow_execution_id.as_deref(),
                            &state_execution_id,
                            minute,
                            MLAnalysisType::LogCluster,
                            ClusterLevel::L2,
                        )
                        .await?;
                }
            }
            _ => {}
        }

        debug!("{} 日志上报完成: 新写入 {} 条", identity, inserted);
        Ok(IngestOutcome::Accepted { inserted })
    }

    /// 同级别或更高级别的心跳已存在
    async fn already_clustered(
        &self,
        identity: &RecordIdentity,
        level: ClusterLevel,
        slots: &BTreeSet<(String, i64)>,
    ) -> VerifierResult<bool> {
        let levels: Vec<ClusterLevel> = ClusterLevel::ALL_HEARTBEATS
            .into_iter()
            .filter(|hb| hb.rank() >= level.rank())
            .collect();

        for (host, minute) in slots {
            let mut filter = RecordFilter::new(identity.clone())
                .minute(MinuteMatch::Exact(*minute))
                .levels(levels.iter().copied())
                .heartbeats_only();
            if !identity.is_continuous() {
                filter = filter.host(host.clone());
            }
            if !self.logs.store().hosts(&filter).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 采集端已完成单主机聚类的日志
    ///
    /// L1时删除该主机的L0记录并把其心跳推进到H1，所有主机都完成后标记L1聚类任务；
    /// L2时把不晚于该分钟的L1记录合并为H2并标记L2聚类任务。
    #[instrument(skip(self, identity, target_level, elements), fields(
        identity = %identity,
        level = %target_level,
    ))]
    pub async fn ingest_clustered(
        &self,
        identity: &RecordIdentity,
        minute: i64,
        host: &str,
        target_level: ClusterLevel,
        elements: Vec<LogElement>,
    ) -> VerifierResult<IngestOutcome> {
        if !matches!(target_level, ClusterLevel::L1 | ClusterLevel::L2) {
            return Err(VerifierError::InvalidRecord(format!(
                "聚类结果只能写入L1或L2，收到 {target_level}"
            )));
        }

        if let Some(last) = self.logs.last_processed_minute(identity).await? {
            if minute <= last {
                info!("{} 分钟 {} 已处理，丢弃聚类结果", identity, minute);
                return Ok(IngestOutcome::Stale);
            }
        }

        let mut records: Vec<LogDataRecord> = elements
            .iter()
            .map(|element| LogDataRecord::from_element(identity, target_level, element))
            .collect();
        records.push(LogDataRecord::heartbeat(
            identity.clone(),
            host,
            minute,
            target_level,
        ));
        let inserted = self.logs.record_ingested(&records).await?;

        let state_execution_id = identity.task_state_execution_id();
        if target_level == ClusterLevel::L1 {
            self.logs
                .promote(identity, minute, ClusterLevel::L0, ClusterLevel::L1, Some(host))
                .await?;

            let remaining = self
                .logs
                .store()
                .hosts(
                    &RecordFilter::new(identity.clone())
                        .minute(MinuteMatch::Exact(minute))
                        .levels([ClusterLevel::L0, ClusterLevel::H0]),
                )
                .await?;
            if remaining.is_empty() {
                self.task_queue
                    .mark_completed_for(
                        None,
                        &state_execution_id,
                        minute,
                        MLAnalysisType::LogCluster,
                        ClusterLevel::L1,
                    )
                    .await?;
            } else {
                debug!("分钟 {} 还有 {} 个主机未完成L1聚类", minute, remaining.len());
            }
        } else {
            self.logs
                .promote(identity, minute, ClusterLevel::L1, ClusterLevel::L2, None)
                .await?;
            self.task_queue
                .mark_completed_for(
                    None,
                    &state_execution_id,
                    minute,
                    MLAnalysisType::LogCluster,
                    ClusterLevel::L2,
                )
                .await?;
        }

        Ok(IngestOutcome::Accepted { inserted })
    }

    /// 指标上报
    pub async fn ingest_metrics(
        &self,
        identity: &RecordIdentity,
        records: Vec<MetricDataRecord>,
    ) -> VerifierResult<IngestOutcome> {
        if !self.is_valid(identity).await? {
            warn!("验证状态 {} 已失效，拒绝指标上报", identity);
            self.metrics.record_ingest_rejected();
            return Ok(IngestOutcome::Rejected);
        }

        if let Some(record) = records.iter().find(|r| r.identity() != identity) {
            return Err(VerifierError::InvalidRecord(format!(
                "指标记录归属 {} 与上报身份 {} 不一致",
                record.identity, identity
            )));
        }

        let newest_heartbeat = records
            .iter()
            .filter(|r| r.is_heartbeat())
            .map(|r| r.minute)
            .max();
        let Some(batch_minute) = newest_heartbeat.or_else(|| records.iter().map(|r| r.minute).max())
        else {
            return Ok(IngestOutcome::Accepted { inserted: 0 });
        };

        if let Some(last) = self.metric_track.last_processed_minute(identity).await? {
            if last >= batch_minute {
                info!(
                    "{} 分钟 {} 的指标已处理到 {}，忽略上报",
                    identity, batch_minute, last
                );
                return Ok(IngestOutcome::AlreadyClustered);
            }
        }

        let inserted = self.metric_track.record_ingested(&records).await?;
        Ok(IngestOutcome::Accepted { inserted })
    }

    /// 学习引擎回报任务结果，返回任务的新状态
    #[instrument(skip(self, result))]
    pub async fn report_task_result(
        &self,
        task_id: &str,
        result: TaskResult,
    ) -> VerifierResult<ExecutionStatus> {
        let task = self
            .task_queue
            .get(task_id)
            .await?
            .ok_or_else(|| VerifierError::TaskNotFound {
                id: task_id.to_string(),
            })?;

        let record = match result {
            Ok(record) => record,
            Err(error) => return self.task_queue.notify_failure(task_id, &error).await,
        };

        if !self.analysis_records.insert(&record).await? {
            debug!(
                "分析结果已存在: {} 分钟 {}",
                record.identity, record.analysis_minute
            );
        }

        match task.ml_analysis_type {
            MLAnalysisType::LogMl => {
                self.logs
                    .finalize(&record.identity, record.analysis_minute)
                    .await?;
            }
            MLAnalysisType::TimeSeries => {
                self.metric_track
                    .finalize(&record.identity, record.analysis_minute)
                    .await?;
            }
            MLAnalysisType::LogCluster | MLAnalysisType::FeedbackAnalysis => {}
        }

        self.task_queue.mark_completed(task_id).await?;
        self.state_client.trigger_alert_if_necessary(&record).await?;
        info!(
            "任务 {} 的分析结果已写入: {} 分钟 {}",
            task_id, record.identity, record.analysis_minute
        );
        Ok(ExecutionStatus::Success)
    }
}

/// 批次涉及的 (主机, 分钟)，优先取心跳记录
fn batch_slots(elements: &[LogElement]) -> BTreeSet<(String, i64)> {
    let heartbeats: BTreeSet<(String, i64)> = elements
        .iter()
        .filter(|e| e.is_heartbeat())
        .map(|e| (e.host.clone(), e.log_collection_minute))
        .collect();
    if !heartbeats.is_empty() {
        return heartbeats;
    }
    elements
        .iter()
        .map(|e| (e.host.clone(), e.log_collection_minute))
        .collect()
}
