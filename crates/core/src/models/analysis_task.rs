use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ClusterLevel;
use crate::errors::VerifierError;

/// 分析任务与分析上下文共用的执行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
}

impl ExecutionStatus {
    /// 占据任务身份的状态，同一身份下至多存在一个
    pub const ACTIVE: [ExecutionStatus; 3] = [
        ExecutionStatus::Queued,
        ExecutionStatus::Running,
        ExecutionStatus::Success,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "QUEUED",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = VerifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(ExecutionStatus::Queued),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            _ => Err(VerifierError::Serialization(format!(
                "Invalid execution status: {s}"
            ))),
        }
    }
}

/// 学习引擎分析类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MLAnalysisType {
    #[serde(rename = "LOG_CLUSTER")]
    LogCluster,
    #[serde(rename = "LOG_ML")]
    LogMl,
    #[serde(rename = "TIME_SERIES")]
    TimeSeries,
    #[serde(rename = "FEEDBACK_ANALYSIS")]
    FeedbackAnalysis,
}

impl MLAnalysisType {
    pub fn as_str(self) -> &'static str {
        match self {
            MLAnalysisType::LogCluster => "LOG_CLUSTER",
            MLAnalysisType::LogMl => "LOG_ML",
            MLAnalysisType::TimeSeries => "TIME_SERIES",
            MLAnalysisType::FeedbackAnalysis => "FEEDBACK_ANALYSIS",
        }
    }
}

impl fmt::Display for MLAnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MLAnalysisType {
    type Err = VerifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOG_CLUSTER" => Ok(MLAnalysisType::LogCluster),
            "LOG_ML" => Ok(MLAnalysisType::LogMl),
            "TIME_SERIES" => Ok(MLAnalysisType::TimeSeries),
            "FEEDBACK_ANALYSIS" => Ok(MLAnalysisType::FeedbackAnalysis),
            _ => Err(VerifierError::Serialization(format!(
                "Invalid analysis type: {s}"
            ))),
        }
    }
}

/// 学习引擎协议版本
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ServiceApiVersion {
    #[default]
    V1,
}

impl ServiceApiVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceApiVersion::V1 => "V1",
        }
    }
}

impl fmt::Display for ServiceApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceApiVersion {
    type Err = VerifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "V1" => Ok(ServiceApiVersion::V1),
            _ => Err(VerifierError::Serialization(format!(
                "Invalid service api version: {s}"
            ))),
        }
    }
}

pub const DEFAULT_GROUP_NAME: &str = "default";

/// 学习引擎分析任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisTask {
    pub id: String,
    pub state_execution_id: String,
    pub workflow_execution_id: Option<String>,
    pub cv_config_id: Option<String>,
    pub analysis_minute: i64,
    pub ml_analysis_type: MLAnalysisType,
    pub cluster_level: ClusterLevel,
    pub group_name: String,
    pub version: ServiceApiVersion,
    pub tag: Option<String>,
    pub control_nodes: BTreeSet<String>,
    pub test_nodes: BTreeSet<String>,
    pub execution_status: ExecutionStatus,
    pub retry: u32,
    pub is_24x7_task: bool,
    pub service_guard_backoff_count: u32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl AnalysisTask {
    pub fn new(
        state_execution_id: impl Into<String>,
        analysis_minute: i64,
        ml_analysis_type: MLAnalysisType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state_execution_id: state_execution_id.into(),
            workflow_execution_id: None,
            cv_config_id: None,
            analysis_minute,
            ml_analysis_type,
            cluster_level: ClusterLevel::HF,
            group_name: DEFAULT_GROUP_NAME.to_string(),
            version: ServiceApiVersion::V1,
            tag: None,
            control_nodes: BTreeSet::new(),
            test_nodes: BTreeSet::new(),
            execution_status: ExecutionStatus::Queued,
            retry: 0,
            is_24x7_task: false,
            service_guard_backoff_count: 0,
            priority: 1,
            created_at: now,
            last_updated_at: now,
        }
    }

    /// 去重身份（不含分钟）
    pub fn identity(&self) -> TaskIdentity {
        TaskIdentity {
            state_execution_id: self.state_execution_id.clone(),
            ml_analysis_type: self.ml_analysis_type,
            cluster_level: self.cluster_level,
            group_name: self.group_name.clone(),
            version: self.version,
            tag: self.tag.clone(),
            control_nodes: if self.is_24x7_task {
                None
            } else {
                Some(self.control_nodes.clone())
            },
        }
    }

    pub fn is_active(&self) -> bool {
        ExecutionStatus::ACTIVE.contains(&self.execution_status)
    }

    /// 本任务能否取代同身份的活跃任务 `previous`：只有更早分钟的成功任务可以
    pub fn supersedes(&self, previous: &AnalysisTask) -> bool {
        previous.execution_status == ExecutionStatus::Success
            && previous.analysis_minute < self.analysis_minute
    }

    /// 归档后的身份：`{id}-retry-{backoff}`
    pub fn retry_identity(&self) -> String {
        format!(
            "{}{}",
            retry_prefix(&self.state_execution_id),
            self.service_guard_backoff_count
        )
    }
}

pub fn retry_prefix(state_execution_id: &str) -> String {
    format!("{state_execution_id}-retry-")
}

/// 任务身份：持续验证任务不比较control节点
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub state_execution_id: String,
    pub ml_analysis_type: MLAnalysisType,
    pub cluster_level: ClusterLevel,
    pub group_name: String,
    pub version: ServiceApiVersion,
    pub tag: Option<String>,
    pub control_nodes: Option<BTreeSet<String>>,
}

impl TaskIdentity {
    pub fn matches(&self, task: &AnalysisTask) -> bool {
        task.state_execution_id == self.state_execution_id
            && task.ml_analysis_type == self.ml_analysis_type
            && task.cluster_level == self.cluster_level
            && task.group_name == self.group_name
            && task.version == self.version
            && task.tag == self.tag
            && self
                .control_nodes
                .as_ref()
                .is_none_or(|nodes| *nodes == task.control_nodes)
    }
}

/// 领取过滤条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimFilter {
    /// None: 两种任务都可领取
    pub is_24x7: Option<bool>,
    /// None: 除 FEEDBACK_ANALYSIS 外的全部类型；Some(空): 全部类型
    pub task_types: Option<Vec<MLAnalysisType>>,
}

impl ClaimFilter {
    /// 只领取持续验证（true）或部署验证（false）任务
    pub fn with_continuous(mut self, is_24x7: bool) -> Self {
        self.is_24x7 = Some(is_24x7);
        self
    }

    pub fn with_types(mut self, task_types: Vec<MLAnalysisType>) -> Self {
        self.task_types = Some(task_types);
        self
    }

    pub fn accepts_type(&self, task_type: MLAnalysisType) -> bool {
        match &self.task_types {
            None => task_type != MLAnalysisType::FeedbackAnalysis,
            Some(types) if types.is_empty() => true,
            Some(types) => types.contains(&task_type),
        }
    }

    pub fn accepts(&self, task: &AnalysisTask) -> bool {
        self.is_24x7.is_none_or(|flag| flag == task.is_24x7_task)
            && self.accepts_type(task.ml_analysis_type)
    }
}

/// 学习引擎上报的失败信息
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LearningEngineError {
    pub analysis_minute: i64,
    pub error_msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_control_nodes_for_24x7() {
        let mut a = AnalysisTask::new("cv-1", 10, MLAnalysisType::LogMl);
        a.is_24x7_task = true;
        a.control_nodes.insert("h1".to_string());
        let mut b = a.clone();
        b.control_nodes = BTreeSet::from(["h2".to_string()]);

        assert!(a.identity().matches(&b));

        a.is_24x7_task = false;
        assert!(!a.identity().matches(&b));
    }

    #[test]
    fn test_claim_filter_type_rules() {
        let general = ClaimFilter::default();
        assert!(general.accepts_type(MLAnalysisType::LogMl));
        assert!(!general.accepts_type(MLAnalysisType::FeedbackAnalysis));

        let everything = ClaimFilter::default().with_types(vec![]);
        assert!(everything.accepts_type(MLAnalysisType::FeedbackAnalysis));

        let only_ts = ClaimFilter::default().with_types(vec![MLAnalysisType::TimeSeries]);
        assert!(only_ts.accepts_type(MLAnalysisType::TimeSeries));
        assert!(!only_ts.accepts_type(MLAnalysisType::LogCluster));
    }

    #[test]
    fn test_claim_filter_continuous_builder() {
        let mut continuous = AnalysisTask::new("cv-1", 10, MLAnalysisType::TimeSeries);
        continuous.is_24x7_task = true;
        let deployment = AnalysisTask::new("exec-1", 10, MLAnalysisType::TimeSeries);

        let filter = ClaimFilter::default()
            .with_continuous(true)
            .with_types(vec![MLAnalysisType::TimeSeries]);
        assert_eq!(filter.is_24x7, Some(true));
        assert!(filter.accepts(&continuous));
        assert!(!filter.accepts(&deployment));
        assert!(ClaimFilter::default().with_continuous(false).accepts(&deployment));
    }

    #[test]
    fn test_only_earlier_success_is_superseded() {
        let new_task = AnalysisTask::new("exec-1", 42, MLAnalysisType::LogMl);

        let mut previous = AnalysisTask::new("exec-1", 41, MLAnalysisType::LogMl);
        previous.execution_status = ExecutionStatus::Success;
        assert!(new_task.supersedes(&previous));

        previous.analysis_minute = 42;
        assert!(!new_task.supersedes(&previous));

        previous.analysis_minute = 41;
        previous.execution_status = ExecutionStatus::Running;
        assert!(!new_task.supersedes(&previous));
    }

    #[test]
    fn test_retry_identity() {
        let mut task = AnalysisTask::new("CV_24x7_STATE_EXECUTION-cv1", 100, MLAnalysisType::TimeSeries);
        task.service_guard_backoff_count = 3;
        assert_eq!(task.retry_identity(), "CV_24x7_STATE_EXECUTION-cv1-retry-3");
    }
}
