use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionStatus, ServiceApiVersion};
use crate::errors::VerifierError;

/// 分析对比策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ComparisonStrategy {
    #[serde(rename = "COMPARE_WITH_PREVIOUS")]
    CompareWithPrevious,
    #[default]
    #[serde(rename = "COMPARE_WITH_CURRENT")]
    CompareWithCurrent,
    #[serde(rename = "PREDICTIVE")]
    Predictive,
}

impl ComparisonStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonStrategy::CompareWithPrevious => "COMPARE_WITH_PREVIOUS",
            ComparisonStrategy::CompareWithCurrent => "COMPARE_WITH_CURRENT",
            ComparisonStrategy::Predictive => "PREDICTIVE",
        }
    }
}

impl fmt::Display for ComparisonStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonStrategy {
    type Err = VerifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPARE_WITH_PREVIOUS" => Ok(ComparisonStrategy::CompareWithPrevious),
            "COMPARE_WITH_CURRENT" => Ok(ComparisonStrategy::CompareWithCurrent),
            "PREDICTIVE" => Ok(ComparisonStrategy::Predictive),
            _ => Err(VerifierError::Serialization(format!(
                "Invalid comparison strategy: {s}"
            ))),
        }
    }
}

/// 单次验证执行的分析参数
///
/// 验证状态启动时创建，此后只有状态、重试与版本字段会被修改。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisContext {
    pub id: String,
    pub state_execution_id: String,
    pub workflow_execution_id: String,
    pub app_id: String,
    pub service_id: String,
    pub state_type: String,
    /// host -> group
    pub control_nodes: BTreeMap<String, String>,
    pub test_nodes: BTreeMap<String, String>,
    pub time_duration_minutes: i64,
    pub start_data_collection_minute: i64,
    pub comparison_strategy: ComparisonStrategy,
    pub inspect_hosts_in_logs: bool,
    /// 分钟为绝对时间戳分钟而非从0开始的序号
    pub is_per_minute_absolute: bool,
    pub execution_status: ExecutionStatus,
    pub retry: u32,
    pub version: ServiceApiVersion,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl AnalysisContext {
    pub fn new(
        state_execution_id: impl Into<String>,
        workflow_execution_id: impl Into<String>,
        state_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state_execution_id: state_execution_id.into(),
            workflow_execution_id: workflow_execution_id.into(),
            app_id: String::new(),
            service_id: String::new(),
            state_type: state_type.into(),
            control_nodes: BTreeMap::new(),
            test_nodes: BTreeMap::new(),
            time_duration_minutes: 15,
            start_data_collection_minute: 0,
            comparison_strategy: ComparisonStrategy::default(),
            inspect_hosts_in_logs: false,
            is_per_minute_absolute: false,
            execution_status: ExecutionStatus::Queued,
            retry: 0,
            version: ServiceApiVersion::V1,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn control_hosts(&self) -> BTreeSet<String> {
        self.control_nodes.keys().cloned().collect()
    }

    pub fn test_hosts(&self) -> BTreeSet<String> {
        self.test_nodes.keys().cloned().collect()
    }
}
