//! 数据仓储层接口定义
//!
//! 此模块定义了验证流水线持久化层的核心抽象接口：
//! - 分析任务仓储接口 (TaskStore)
//! - 数据记录仓储接口 (RecordStore)，日志与指标共用
//! - 分析上下文仓储接口 (ContextStore)
//! - 分析结果仓储接口 (AnalysisRecordStore)
//!
//! ## 原子性约定
//!
//! 仓储层不提供跨表事务，写操作各自原子：
//! - `try_claim` 是比较并交换：只有一个调用方能领取某个任务
//! - `insert_if_absent` 在同一写事务内完成去重检查与插入
//! - 重复插入被忽略而不是报错，调用方据此实现幂等
//! - 级别迁移遇到唯一键冲突时跳过冲突行，由后续删除清理
//!
//! ## 实现
//!
//! - SQLite 实现（`verifier-infrastructure::database::sqlite`）
//! - 内存实现（`verifier-infrastructure::memory`，嵌入与测试用）

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    AnalysisContext, AnalysisRecord, AnalysisStatus, AnalysisTask, ClaimFilter, ClusterLevel,
    ExecutionStatus, LevelRecord, MLAnalysisType, MinuteMatch, RecordFilter, RecordIdentity,
    ServiceApiVersion, TaskIdentity,
};
use crate::VerifierResult;

/// 领取条件：版本、重试上限与租约截止时间
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimCriteria {
    pub version: ServiceApiVersion,
    /// `retry <= max_retries` 的任务才可领取
    pub max_retries: u32,
    /// 早于该时间仍为RUNNING的任务视为已放弃
    pub stale_before: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// 去重插入结果
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// 已写入；`superseded` 为被取代的更早分钟成功任务
    Inserted { superseded: Option<String> },
    /// 同一身份已有活跃任务，未写入
    Blocked(AnalysisTask),
}

/// 分析任务查询条件，结果按 `last_updated_at` 倒序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQuery {
    pub workflow_execution_id: Option<String>,
    pub state_execution_id: Option<String>,
    pub state_execution_prefix: Option<String>,
    pub cv_config_id: Option<String>,
    pub analysis_minute: Option<MinuteMatch>,
    pub ml_analysis_type: Option<MLAnalysisType>,
    pub cluster_level: Option<ClusterLevel>,
    /// 为空时不限制状态
    pub statuses: Vec<ExecutionStatus>,
}

impl TaskQuery {
    pub fn matches(&self, task: &AnalysisTask) -> bool {
        self.workflow_execution_id
            .as_ref()
            .is_none_or(|id| task.workflow_execution_id.as_ref() == Some(id))
            && self
                .state_execution_id
                .as_ref()
                .is_none_or(|id| task.state_execution_id == *id)
            && self
                .state_execution_prefix
                .as_ref()
                .is_none_or(|prefix| task.state_execution_id.starts_with(prefix.as_str()))
            && self
                .cv_config_id
                .as_ref()
                .is_none_or(|id| task.cv_config_id.as_ref() == Some(id))
            && self
                .analysis_minute
                .is_none_or(|m| m.matches(task.analysis_minute))
            && self
                .ml_analysis_type
                .is_none_or(|t| t == task.ml_analysis_type)
            && self.cluster_level.is_none_or(|l| l == task.cluster_level)
            && (self.statuses.is_empty() || self.statuses.contains(&task.execution_status))
    }
}

/// 分析任务仓储接口
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: &AnalysisTask) -> VerifierResult<()>;

    async fn get(&self, id: &str) -> VerifierResult<Option<AnalysisTask>>;

    /// 同一身份下分钟不晚于 `max_minute` 的最新活跃任务（QUEUED/RUNNING/SUCCESS）
    async fn find_latest_active(
        &self,
        identity: &TaskIdentity,
        max_minute: i64,
    ) -> VerifierResult<Option<AnalysisTask>>;

    /// 原子去重插入
    ///
    /// 查找同一身份下分钟不晚于新任务的最新活跃任务：没有或是更早分钟的成功任务时写入，
    /// 否则返回该任务。检查与写入之间不会有其他写入者插入同身份任务。
    async fn insert_if_absent(&self, task: &AnalysisTask) -> VerifierResult<InsertOutcome>;

    /// 原子领取
    ///
    /// 选出满足条件的第一个任务（`priority`、`created_at` 升序），
    /// 在同一条语句中置为RUNNING、`retry + 1`、刷新 `last_updated_at`，
    /// 返回更新后的任务。
    async fn try_claim(
        &self,
        criteria: &ClaimCriteria,
        filter: &ClaimFilter,
    ) -> VerifierResult<Option<AnalysisTask>>;

    /// 返回是否有行被修改（状态已相同视为未修改）
    async fn update_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> VerifierResult<bool>;

    /// 批量更新状态，返回修改行数
    async fn update_status_where(
        &self,
        query: &TaskQuery,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> VerifierResult<u64>;

    async fn find(&self, query: &TaskQuery) -> VerifierResult<Vec<AnalysisTask>>;

    async fn rename_state_execution(
        &self,
        id: &str,
        state_execution_id: &str,
        now: DateTime<Utc>,
    ) -> VerifierResult<bool>;
}

/// 数据记录仓储接口
#[async_trait]
pub trait RecordStore<R: LevelRecord>: Send + Sync {
    /// 忽略已存在的记录，返回新插入的条数
    async fn insert(&self, records: &[R]) -> VerifierResult<u64>;

    async fn find(&self, filter: &RecordFilter) -> VerifierResult<Vec<R>>;

    async fn hosts(&self, filter: &RecordFilter) -> VerifierResult<BTreeSet<String>>;

    /// 把匹配的记录迁移到新级别
    ///
    /// 目标级别上已存在相同记录的行保持原状，返回实际迁移的条数。
    async fn update_level(&self, filter: &RecordFilter, to: ClusterLevel) -> VerifierResult<u64>;

    async fn delete(&self, filter: &RecordFilter) -> VerifierResult<u64>;

    async fn min_minute(&self, filter: &RecordFilter) -> VerifierResult<Option<i64>>;

    async fn max_minute(&self, filter: &RecordFilter) -> VerifierResult<Option<i64>>;
}

/// 分析上下文仓储接口
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// 按ID插入或覆盖
    async fn save(&self, context: &AnalysisContext) -> VerifierResult<()>;

    async fn get(&self, id: &str) -> VerifierResult<Option<AnalysisContext>>;

    async fn get_by_state_execution(
        &self,
        state_execution_id: &str,
    ) -> VerifierResult<Option<AnalysisContext>>;

    /// 与任务领取相同的原子语义，按 `created_at` 升序
    async fn try_claim(&self, criteria: &ClaimCriteria) -> VerifierResult<Option<AnalysisContext>>;

    async fn update_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> VerifierResult<bool>;
}

/// 分析结果仓储接口
#[async_trait]
pub trait AnalysisRecordStore: Send + Sync {
    /// 重复写入返回 false
    async fn insert(&self, record: &AnalysisRecord) -> VerifierResult<bool>;

    async fn get(
        &self,
        identity: &RecordIdentity,
        analysis_minute: i64,
        status: AnalysisStatus,
    ) -> VerifierResult<Option<AnalysisRecord>>;

    async fn find_by_identity(&self, identity: &RecordIdentity) -> VerifierResult<Vec<AnalysisRecord>>;
}
