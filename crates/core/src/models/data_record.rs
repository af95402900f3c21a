use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ClusterLevel;

/// 持续验证任务使用的伪执行ID前缀
pub const CV_24X7_STATE_EXECUTION: &str = "CV_24x7_STATE_EXECUTION";

/// 指标心跳记录使用的指标名
pub const HEARTBEAT_METRIC_NAME: &str = "Harness heartbeat metric";

/// 对比上一次部署且不检查主机时，心跳以此伪主机名上报
pub const NON_HOST_PREVIOUS_ANALYSIS: &str = "NON_HOST_PREVIOUS_ANALYSIS";

/// 数据记录的归属：单次验证执行或持续验证配置
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordIdentity {
    StateExecution(String),
    CvConfig(String),
}

impl RecordIdentity {
    pub fn state_execution(id: impl Into<String>) -> Self {
        RecordIdentity::StateExecution(id.into())
    }

    pub fn cv_config(id: impl Into<String>) -> Self {
        RecordIdentity::CvConfig(id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            RecordIdentity::StateExecution(id) | RecordIdentity::CvConfig(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RecordIdentity::StateExecution(_) => "STATE_EXECUTION",
            RecordIdentity::CvConfig(_) => "CV_CONFIG",
        }
    }

    pub fn from_parts(kind: &str, id: impl Into<String>) -> Option<Self> {
        match kind {
            "STATE_EXECUTION" => Some(RecordIdentity::StateExecution(id.into())),
            "CV_CONFIG" => Some(RecordIdentity::CvConfig(id.into())),
            _ => None,
        }
    }

    /// 持续验证（24x7）数据
    pub fn is_continuous(&self) -> bool {
        matches!(self, RecordIdentity::CvConfig(_))
    }

    /// 分析任务上使用的执行ID
    pub fn task_state_execution_id(&self) -> String {
        match self {
            RecordIdentity::StateExecution(id) => id.clone(),
            RecordIdentity::CvConfig(id) => format!("{CV_24X7_STATE_EXECUTION}-{id}"),
        }
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// 按聚类级别推进的记录
///
/// 日志与指标共用同一套屏障与推进逻辑，差异只在载荷与心跳的表达方式。
pub trait LevelRecord: Clone + Debug + Send + Sync + 'static {
    fn identity(&self) -> &RecordIdentity;
    fn host(&self) -> &str;
    fn minute(&self) -> i64;
    fn level(&self) -> ClusterLevel;
    fn set_level(&mut self, level: ClusterLevel);
    /// 同一身份、主机、分钟、级别下的去重键
    fn payload_key(&self) -> String;
    fn is_heartbeat(&self) -> bool;
    /// 构造某主机在某分钟、某级别上的心跳记录
    fn heartbeat(identity: RecordIdentity, host: &str, minute: i64, level: ClusterLevel) -> Self;
}

/// 数据采集方上报的单条日志（聚类标签为负表示心跳）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogElement {
    pub query: String,
    pub cluster_label: i32,
    pub host: String,
    pub log_collection_minute: i64,
    pub count: i64,
    pub log_message: String,
}

impl LogElement {
    pub fn heartbeat(host: impl Into<String>, minute: i64) -> Self {
        Self {
            query: String::new(),
            cluster_label: -3,
            host: host.into(),
            log_collection_minute: minute,
            count: 0,
            log_message: String::new(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.cluster_label < 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogDataRecord {
    pub identity: RecordIdentity,
    pub host: String,
    pub minute: i64,
    pub level: ClusterLevel,
    pub query: String,
    pub cluster_label: i32,
    pub log_message: String,
    pub count: i64,
    pub created_at: DateTime<Utc>,
}

impl LogDataRecord {
    /// 心跳元素落在提交级别对应的心跳级别上
    pub fn from_element(identity: &RecordIdentity, level: ClusterLevel, element: &LogElement) -> Self {
        let level = if element.is_heartbeat() {
            level.heartbeat()
        } else {
            level
        };
        Self {
            identity: identity.clone(),
            host: element.host.clone(),
            minute: element.log_collection_minute,
            level,
            query: element.query.clone(),
            cluster_label: element.cluster_label,
            log_message: element.log_message.clone(),
            count: element.count,
            created_at: Utc::now(),
        }
    }
}

impl LevelRecord for LogDataRecord {
    fn identity(&self) -> &RecordIdentity {
        &self.identity
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn minute(&self) -> i64 {
        self.minute
    }

    fn level(&self) -> ClusterLevel {
        self.level
    }

    fn set_level(&mut self, level: ClusterLevel) {
        self.level = level;
    }

    fn payload_key(&self) -> String {
        format!("{}:{}", self.cluster_label, self.log_message)
    }

    fn is_heartbeat(&self) -> bool {
        self.cluster_label < 0 || self.level.is_heartbeat()
    }

    fn heartbeat(identity: RecordIdentity, host: &str, minute: i64, level: ClusterLevel) -> Self {
        Self::from_element(&identity, level.heartbeat(), &LogElement::heartbeat(host, minute))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDataRecord {
    pub identity: RecordIdentity,
    pub host: String,
    pub minute: i64,
    pub level: ClusterLevel,
    pub group_name: String,
    pub metric_name: String,
    pub values: BTreeMap<String, f64>,
    pub created_at: DateTime<Utc>,
}

impl MetricDataRecord {
    pub fn new(
        identity: RecordIdentity,
        host: impl Into<String>,
        minute: i64,
        metric_name: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            host: host.into(),
            minute,
            level: ClusterLevel::H0,
            group_name: super::analysis_task::DEFAULT_GROUP_NAME.to_string(),
            metric_name: metric_name.into(),
            values: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = group_name.into();
        self
    }
}

impl LevelRecord for MetricDataRecord {
    fn identity(&self) -> &RecordIdentity {
        &self.identity
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn minute(&self) -> i64 {
        self.minute
    }

    fn level(&self) -> ClusterLevel {
        self.level
    }

    fn set_level(&mut self, level: ClusterLevel) {
        self.level = level;
    }

    fn payload_key(&self) -> String {
        format!("{}/{}", self.group_name, self.metric_name)
    }

    fn is_heartbeat(&self) -> bool {
        self.metric_name == HEARTBEAT_METRIC_NAME
    }

    fn heartbeat(identity: RecordIdentity, host: &str, minute: i64, level: ClusterLevel) -> Self {
        let mut record = Self::new(identity, host, minute, HEARTBEAT_METRIC_NAME);
        record.level = level.heartbeat();
        record
    }
}

/// 分钟匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinuteMatch {
    Exact(i64),
    AtMost(i64),
    AtLeast(i64),
}

impl MinuteMatch {
    pub fn matches(self, minute: i64) -> bool {
        match self {
            MinuteMatch::Exact(m) => minute == m,
            MinuteMatch::AtMost(m) => minute <= m,
            MinuteMatch::AtLeast(m) => minute >= m,
        }
    }
}

/// 数据记录查询条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    pub identity: RecordIdentity,
    pub minute: Option<MinuteMatch>,
    /// 为空时不限制级别
    pub levels: Vec<ClusterLevel>,
    pub hosts: Option<BTreeSet<String>>,
    pub heartbeat: Option<bool>,
}

impl RecordFilter {
    pub fn new(identity: RecordIdentity) -> Self {
        Self {
            identity,
            minute: None,
            levels: Vec::new(),
            hosts: None,
            heartbeat: None,
        }
    }

    pub fn minute(mut self, minute: MinuteMatch) -> Self {
        self.minute = Some(minute);
        self
    }

    pub fn level(mut self, level: ClusterLevel) -> Self {
        self.levels.push(level);
        self
    }

    pub fn levels(mut self, levels: impl IntoIterator<Item = ClusterLevel>) -> Self {
        self.levels.extend(levels);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.hosts.get_or_insert_with(BTreeSet::new).insert(host.into());
        self
    }

    pub fn hosts(mut self, hosts: BTreeSet<String>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    pub fn heartbeats_only(mut self) -> Self {
        self.heartbeat = Some(true);
        self
    }

    pub fn data_only(mut self) -> Self {
        self.heartbeat = Some(false);
        self
    }

    pub fn matches<R: LevelRecord>(&self, record: &R) -> bool {
        record.identity() == &self.identity
            && self.minute.is_none_or(|m| m.matches(record.minute()))
            && (self.levels.is_empty() || self.levels.contains(&record.level()))
            && self
                .hosts
                .as_ref()
                .is_none_or(|hosts| hosts.contains(record.host()))
            && self.heartbeat.is_none_or(|hb| hb == record.is_heartbeat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_element_lands_on_heartbeat_level() {
        let identity = RecordIdentity::state_execution("exec-1");
        let hb = LogDataRecord::from_element(&identity, ClusterLevel::L0, &LogElement::heartbeat("h1", 42));
        assert_eq!(hb.level, ClusterLevel::H0);
        assert!(hb.is_heartbeat());

        let element = LogElement {
            query: "exception".to_string(),
            cluster_label: 2,
            host: "h1".to_string(),
            log_collection_minute: 42,
            count: 7,
            log_message: "NullPointerException".to_string(),
        };
        let data = LogDataRecord::from_element(&identity, ClusterLevel::L0, &element);
        assert_eq!(data.level, ClusterLevel::L0);
        assert!(!data.is_heartbeat());
        assert_eq!(data.payload_key(), "2:NullPointerException");
    }

    #[test]
    fn test_metric_heartbeat() {
        let identity = RecordIdentity::cv_config("cv-1");
        let hb = MetricDataRecord::heartbeat(identity.clone(), "h1", 10, ClusterLevel::H0);
        assert!(hb.is_heartbeat());
        assert_eq!(hb.level, ClusterLevel::H0);

        let data = MetricDataRecord::new(identity, "h1", 10, "cpu").with_value("avg", 0.5);
        assert!(!data.is_heartbeat());
        assert_eq!(data.payload_key(), "default/cpu");
    }

    #[test]
    fn test_filter_matching() {
        let identity = RecordIdentity::state_execution("exec-1");
        let record = LogDataRecord::heartbeat(identity.clone(), "h1", 42, ClusterLevel::L0);

        let filter = RecordFilter::new(identity.clone())
            .minute(MinuteMatch::AtMost(42))
            .level(ClusterLevel::H0)
            .heartbeats_only();
        assert!(filter.matches(&record));
        assert!(!filter.clone().host("h2").matches(&record));
        assert!(!RecordFilter::new(identity).minute(MinuteMatch::Exact(41)).matches(&record));
        assert!(!RecordFilter::new(RecordIdentity::cv_config("exec-1")).matches(&record));
    }

    #[test]
    fn test_continuous_task_execution_id() {
        assert_eq!(
            RecordIdentity::cv_config("abc").task_state_execution_id(),
            "CV_24x7_STATE_EXECUTION-abc"
        );
        assert_eq!(RecordIdentity::state_execution("s1").task_state_execution_id(), "s1");
    }
}
