//! 聚类级别推进
//!
//! 日志与指标共用同一套屏障、推进与过期判定逻辑，差异由 [`LevelTrack`] 描述。
//! 所有操作都不阻塞：屏障未就绪时返回 [`AdvanceOutcome::NotReady`]，
//! 由下一次数据上报重新触发。

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use verifier_core::{
    models::{
        AnalysisContext, ClusterLevel, ComparisonStrategy, LevelRecord, LogDataRecord,
        MLAnalysisType, MetricDataRecord, MinuteMatch, RecordFilter, RecordIdentity,
        NON_HOST_PREVIOUS_ANALYSIS,
    },
    traits::RecordStore,
    VerifierResult,
};

use crate::metrics::VerifierMetrics;
use crate::task_queue::AnalysisTaskQueue;

/// 记录类型在聚类流水线上的轨道
pub trait LevelTrack: LevelRecord {
    /// 分析完成时迁移到最终级别的心跳级别
    const FINALIZE_FROM: ClusterLevel;
    /// 最终化是否包含更早的分钟
    const FINALIZE_CUMULATIVE: bool;
    /// 推进成功后需要标记完成的聚类任务类型
    const CLUSTER_TASK: Option<MLAnalysisType>;
}

impl LevelTrack for LogDataRecord {
    const FINALIZE_FROM: ClusterLevel = ClusterLevel::H2;
    const FINALIZE_CUMULATIVE: bool = false;
    const CLUSTER_TASK: Option<MLAnalysisType> = Some(MLAnalysisType::LogCluster);
}

impl LevelTrack for MetricDataRecord {
    const FINALIZE_FROM: ClusterLevel = ClusterLevel::H0;
    const FINALIZE_CUMULATIVE: bool = true;
    const CLUSTER_TASK: Option<MLAnalysisType> = None;
}

/// 一次推进请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvanceRequest {
    pub identity: RecordIdentity,
    pub workflow_execution_id: Option<String>,
    pub minute: i64,
    pub from: ClusterLevel,
    pub to: ClusterLevel,
    /// 为空时任意主机上报心跳即视为就绪
    pub expected_hosts: BTreeSet<String>,
    /// 只推进单个主机的记录
    pub host: Option<String>,
}

impl AdvanceRequest {
    pub fn new(identity: RecordIdentity, minute: i64, from: ClusterLevel, to: ClusterLevel) -> Self {
        Self {
            identity,
            workflow_execution_id: None,
            minute,
            from,
            to,
            expected_hosts: BTreeSet::new(),
            host: None,
        }
    }

    pub fn with_expected_hosts(mut self, hosts: impl IntoIterator<Item = String>) -> Self {
        self.expected_hosts = hosts.into_iter().collect();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_workflow_execution(mut self, workflow_execution_id: impl Into<String>) -> Self {
        self.workflow_execution_id = Some(workflow_execution_id.into());
        self
    }
}

/// 推进结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced {
        moved: u64,
        heartbeats: u64,
        deleted: u64,
    },
    /// 仍缺少心跳的主机，没有修改任何数据
    NotReady { missing: BTreeSet<String> },
    /// 该分钟已最终化，上报的数据被删除
    Stale { deleted: u64 },
}

/// 心跳迁移与清理的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Promotion {
    pub heartbeats: u64,
    pub deleted: u64,
}

pub struct ClusterLevelAdvancer<R: LevelTrack> {
    store: Arc<dyn RecordStore<R>>,
    task_queue: Arc<AnalysisTaskQueue>,
    metrics: VerifierMetrics,
}

pub type LogLevelAdvancer = ClusterLevelAdvancer<LogDataRecord>;
pub type MetricLevelAdvancer = ClusterLevelAdvancer<MetricDataRecord>;

impl<R: LevelTrack> ClusterLevelAdvancer<R> {
    pub fn new(store: Arc<dyn RecordStore<R>>, task_queue: Arc<AnalysisTaskQueue>) -> Self {
        Self {
            store,
            task_queue,
            metrics: VerifierMetrics::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore<R>> {
        &self.store
    }

    /// 写入上报的记录，重复记录被忽略，返回新写入条数
    pub async fn record_ingested(&self, records: &[R]) -> VerifierResult<u64> {
        let inserted = self.store.insert(records).await?;
        self.metrics.record_ingested(inserted);
        debug!("写入 {} 条记录，其中 {} 条为新记录", records.len(), inserted);
        Ok(inserted)
    }

    /// 屏障检查通过后把一个分钟的记录推进到下一级别
    #[instrument(skip(self, request), fields(
        identity = %request.identity,
        minute = request.minute,
        from = %request.from,
        to = %request.to,
    ))]
    pub async fn try_advance(&self, request: &AdvanceRequest) -> VerifierResult<AdvanceOutcome> {
        request.from.ensure_advances_to(request.to)?;
        let identity = &request.identity;
        let from_heartbeat = request.from.heartbeat();

        if let Some(last) = self.last_processed_minute(identity).await? {
            if request.minute <= last {
                let mut filter = RecordFilter::new(identity.clone())
                    .minute(MinuteMatch::Exact(request.minute))
                    .levels([request.from, from_heartbeat]);
                if let Some(host) = &request.host {
                    filter = filter.host(host.clone());
                }
                let deleted = self.store.delete(&filter).await?;
                info!(
                    "分钟 {} 不晚于已处理的分钟 {}，删除过期记录 {} 条",
                    request.minute, last, deleted
                );
                self.metrics.record_stale_deleted(deleted);
                return Ok(AdvanceOutcome::Stale { deleted });
            }
        }

        let observed = self
            .store
            .hosts(
                &RecordFilter::new(identity.clone())
                    .minute(MinuteMatch::Exact(request.minute))
                    .level(from_heartbeat)
                    .heartbeats_only(),
            )
            .await?;
        let missing: BTreeSet<String> = request
            .expected_hosts
            .difference(&observed)
            .cloned()
            .collect();
        if observed.is_empty() || !missing.is_empty() {
            info!(
                "分钟 {} 在级别 {} 尚未就绪，缺少心跳: {:?}",
                request.minute, from_heartbeat, missing
            );
            return Ok(AdvanceOutcome::NotReady { missing });
        }

        let mut data = RecordFilter::new(identity.clone())
            .minute(MinuteMatch::Exact(request.minute))
            .level(request.from)
            .data_only();
        if let Some(host) = &request.host {
            data = data.host(host.clone());
        }
        let moved = self.store.update_level(&data, request.to).await?;

        let promotion = self
            .promote(
                identity,
                request.minute,
                request.from,
                request.to,
                request.host.as_deref(),
            )
            .await?;

        if let Some(task_type) = R::CLUSTER_TASK {
            self.task_queue
                .mark_completed_for(
                    request.workflow_execution_id.as_deref(),
                    &identity.task_state_execution_id(),
                    request.minute,
                    task_type,
                    request.to,
                )
                .await?;
        }

        info!(
            "分钟 {} 已从 {} 推进到 {}: 迁移 {} 条，心跳 {} 条，清理 {} 条",
            request.minute, request.from, request.to, moved, promotion.heartbeats, promotion.deleted
        );
        self.metrics.record_level_advance();
        Ok(AdvanceOutcome::Advanced {
            moved,
            heartbeats: promotion.heartbeats,
            deleted: promotion.deleted,
        })
    }

    /// 把 `heartbeat(from)` 迁移到 `heartbeat(to)`，并删除 `from` 级别的剩余记录
    ///
    /// 推进到L2时按 `minute <= 目标分钟` 删除，L2是跨分钟的全局汇总。
    pub async fn promote(
        &self,
        identity: &RecordIdentity,
        minute: i64,
        from: ClusterLevel,
        to: ClusterLevel,
        host: Option<&str>,
    ) -> VerifierResult<Promotion> {
        from.ensure_advances_to(to)?;
        let from_heartbeat = from.heartbeat();

        let mut heartbeats = RecordFilter::new(identity.clone())
            .minute(MinuteMatch::Exact(minute))
            .level(from_heartbeat)
            .heartbeats_only();
        let cleanup_minute = if to == ClusterLevel::L2 {
            MinuteMatch::AtMost(minute)
        } else {
            MinuteMatch::Exact(minute)
        };
        let mut leftovers = RecordFilter::new(identity.clone())
            .minute(cleanup_minute)
            .levels([from, from_heartbeat]);
        if let Some(host) = host {
            heartbeats = heartbeats.host(host);
            leftovers = leftovers.host(host);
        }

        let moved = self.store.update_level(&heartbeats, to.heartbeat()).await?;
        let deleted = self.store.delete(&leftovers).await?;
        Ok(Promotion {
            heartbeats: moved,
            deleted,
        })
    }

    /// 所有节点都已在 `heartbeat(level)` 上报心跳的最早分钟
    ///
    /// 已处理过的分钟被删除并跳过。
    pub async fn next_ready_minute(
        &self,
        identity: &RecordIdentity,
        level: ClusterLevel,
        nodes: &BTreeSet<String>,
    ) -> VerifierResult<Option<i64>> {
        let heartbeat = level.heartbeat();
        let last = self.last_processed_minute(identity).await?;

        let mut filter = RecordFilter::new(identity.clone())
            .level(heartbeat)
            .heartbeats_only();
        if !nodes.is_empty() {
            filter = filter.hosts(nodes.clone());
        }

        loop {
            let Some(minute) = self.store.min_minute(&filter).await? else {
                return Ok(None);
            };

            if last.is_some_and(|last| minute <= last) {
                let stale = RecordFilter::new(identity.clone())
                    .minute(MinuteMatch::Exact(minute))
                    .levels([level, heartbeat]);
                let deleted = self.store.delete(&stale).await?;
                info!("跳过已处理的分钟 {}，删除 {} 条记录", minute, deleted);
                self.metrics.record_stale_deleted(deleted);
                continue;
            }

            let hosts = self
                .store
                .hosts(&filter.clone().minute(MinuteMatch::Exact(minute)))
                .await?;
            if nodes.is_subset(&hosts) {
                return Ok(Some(minute));
            }
            debug!(
                "分钟 {} 在级别 {} 还缺少 {} 个主机",
                minute,
                heartbeat,
                nodes.difference(&hosts).count()
            );
            return Ok(None);
        }
    }

    /// 分析结果写入后把心跳迁移到最终级别
    pub async fn finalize(&self, identity: &RecordIdentity, minute: i64) -> VerifierResult<u64> {
        let minute_match = if R::FINALIZE_CUMULATIVE {
            MinuteMatch::AtMost(minute)
        } else {
            MinuteMatch::Exact(minute)
        };
        let heartbeats = RecordFilter::new(identity.clone())
            .minute(minute_match)
            .level(R::FINALIZE_FROM)
            .heartbeats_only();

        let moved = self.store.update_level(&heartbeats, ClusterLevel::FINAL).await?;
        // 目标级别已存在的心跳保持原状，清理剩余的副本
        self.store.delete(&heartbeats).await?;
        info!("{} 分钟 {} 已最终化: {} 条心跳", identity, minute, moved);
        Ok(moved)
    }

    pub async fn last_processed_minute(
        &self,
        identity: &RecordIdentity,
    ) -> VerifierResult<Option<i64>> {
        self.store
            .max_minute(&RecordFilter::new(identity.clone()).level(ClusterLevel::FINAL))
            .await
    }

    /// 分析窗口内的所有分钟是否都已处理
    pub async fn is_processing_complete(
        &self,
        context: &AnalysisContext,
        collection_minute: i64,
    ) -> VerifierResult<bool> {
        let identity = RecordIdentity::state_execution(context.state_execution_id.clone());
        let Some(last) = self.last_processed_minute(&identity).await? else {
            return Ok(false);
        };

        let processed = if context.is_per_minute_absolute {
            last - collection_minute
        } else {
            last
        };
        Ok(processed >= context.time_duration_minutes - 1)
    }

    /// 屏障需要等待的主机集合
    pub async fn collected_nodes(
        &self,
        context: &AnalysisContext,
        level: ClusterLevel,
    ) -> VerifierResult<BTreeSet<String>> {
        match context.comparison_strategy {
            ComparisonStrategy::CompareWithCurrent => {
                let mut nodes = context.test_hosts();
                if level != ClusterLevel::L2 {
                    nodes.extend(context.control_hosts());
                }
                Ok(nodes)
            }
            ComparisonStrategy::CompareWithPrevious if !context.inspect_hosts_in_logs => {
                let identity = RecordIdentity::state_execution(context.state_execution_id.clone());
                let heartbeat = level.heartbeat();
                let marker = RecordFilter::new(identity.clone())
                    .level(heartbeat)
                    .host(NON_HOST_PREVIOUS_ANALYSIS)
                    .heartbeats_only();

                let Some(minute) = self.store.min_minute(&marker).await? else {
                    return Ok(BTreeSet::from([NON_HOST_PREVIOUS_ANALYSIS.to_string()]));
                };
                self.store
                    .hosts(
                        &RecordFilter::new(identity)
                            .minute(MinuteMatch::Exact(minute))
                            .level(heartbeat)
                            .heartbeats_only(),
                    )
                    .await
            }
            ComparisonStrategy::CompareWithPrevious | ComparisonStrategy::Predictive => {
                Ok(context.test_hosts())
            }
        }
    }
}
