//! 测试数据构造器，提供合理的默认值

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use verifier_core::models::{
    AnalysisContext, AnalysisRecord, AnalysisTask, ClusterLevel, ComparisonStrategy, ExecutionStatus,
    LogElement, MLAnalysisType, MetricDataRecord, RecordIdentity, HEARTBEAT_METRIC_NAME,
};

pub struct AnalysisTaskBuilder {
    task: AnalysisTask,
}

impl AnalysisTaskBuilder {
    pub fn new() -> Self {
        Self {
            task: AnalysisTask::new("exec-1", 0, MLAnalysisType::LogMl),
        }
    }

    pub fn with_state_execution(mut self, state_execution_id: &str) -> Self {
        self.task.state_execution_id = state_execution_id.to_string();
        self
    }

    pub fn with_workflow_execution(mut self, workflow_execution_id: &str) -> Self {
        self.task.workflow_execution_id = Some(workflow_execution_id.to_string());
        self
    }

    pub fn with_minute(mut self, minute: i64) -> Self {
        self.task.analysis_minute = minute;
        self
    }

    pub fn with_type(mut self, task_type: MLAnalysisType) -> Self {
        self.task.ml_analysis_type = task_type;
        self
    }

    pub fn with_level(mut self, level: ClusterLevel) -> Self {
        self.task.cluster_level = level;
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.task.execution_status = status;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.task.retry = retry;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_control_nodes(mut self, nodes: &[&str]) -> Self {
        self.task.control_nodes = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_test_nodes(mut self, nodes: &[&str]) -> Self {
        self.task.test_nodes = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.task.last_updated_at = at;
        self
    }

    /// 持续验证任务：执行ID取配置的伪执行ID
    pub fn continuous(mut self, cv_config_id: &str) -> Self {
        self.task.is_24x7_task = true;
        self.task.cv_config_id = Some(cv_config_id.to_string());
        self.task.state_execution_id =
            RecordIdentity::cv_config(cv_config_id).task_state_execution_id();
        self
    }

    pub fn with_backoff_count(mut self, count: u32) -> Self {
        self.task.service_guard_backoff_count = count;
        self
    }

    pub fn build(self) -> AnalysisTask {
        self.task
    }
}

impl Default for AnalysisTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AnalysisContextBuilder {
    context: AnalysisContext,
}

impl AnalysisContextBuilder {
    pub fn new(state_execution_id: &str) -> Self {
        Self {
            context: AnalysisContext::new(state_execution_id, "wf-1", "ELK"),
        }
    }

    pub fn with_control_nodes(mut self, hosts: &[&str]) -> Self {
        self.context.control_nodes = hosts
            .iter()
            .map(|h| (h.to_string(), "default".to_string()))
            .collect();
        self
    }

    pub fn with_test_nodes(mut self, hosts: &[&str]) -> Self {
        self.context.test_nodes = hosts
            .iter()
            .map(|h| (h.to_string(), "default".to_string()))
            .collect();
        self
    }

    pub fn with_strategy(mut self, strategy: ComparisonStrategy) -> Self {
        self.context.comparison_strategy = strategy;
        self
    }

    pub fn with_duration(mut self, minutes: i64) -> Self {
        self.context.time_duration_minutes = minutes;
        self
    }

    pub fn inspect_hosts(mut self) -> Self {
        self.context.inspect_hosts_in_logs = true;
        self
    }

    pub fn absolute_minutes(mut self, start_minute: i64) -> Self {
        self.context.is_per_minute_absolute = true;
        self.context.start_data_collection_minute = start_minute;
        self
    }

    pub fn build(self) -> AnalysisContext {
        self.context
    }
}

/// 普通日志元素
pub fn log_element(host: &str, minute: i64, cluster_label: i32, message: &str) -> LogElement {
    LogElement {
        query: "exception".to_string(),
        cluster_label,
        host: host.to_string(),
        log_collection_minute: minute,
        count: 1,
        log_message: message.to_string(),
    }
}

/// 某主机在某分钟的一批L0日志，附带心跳
pub fn l0_batch(host: &str, minute: i64, messages: &[&str]) -> Vec<LogElement> {
    let mut batch: Vec<LogElement> = messages
        .iter()
        .enumerate()
        .map(|(label, message)| log_element(host, minute, label as i32, message))
        .collect();
    batch.push(LogElement::heartbeat(host, minute));
    batch
}

pub fn metric_record(identity: &RecordIdentity, host: &str, minute: i64, value: f64) -> MetricDataRecord {
    MetricDataRecord::new(identity.clone(), host, minute, "response_time").with_value("avg", value)
}

pub fn metric_heartbeat(identity: &RecordIdentity, host: &str, minute: i64) -> MetricDataRecord {
    MetricDataRecord::new(identity.clone(), host, minute, HEARTBEAT_METRIC_NAME)
}

pub fn analysis_record(identity: &RecordIdentity, minute: i64, task_type: MLAnalysisType) -> AnalysisRecord {
    AnalysisRecord::new(
        identity.clone(),
        minute,
        task_type,
        serde_json::json!({ "risk": 0, "minute": minute }),
    )
}

pub fn hosts(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}
