//! 动态查询条件构造
//!
//! 只负责把查询条件翻译成 `WHERE` 子句与参数列表，参数按出现顺序绑定到 `?` 占位符。

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;
use verifier_core::models::{
    ClaimFilter, ClusterLevel, ExecutionStatus, MLAnalysisType, MinuteMatch, RecordFilter,
    ServiceApiVersion,
};
use verifier_core::traits::{ClaimCriteria, TaskQuery};

pub type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// 查询参数
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Bool(bool),
    Time(DateTime<Utc>),
    Level(ClusterLevel),
    Status(ExecutionStatus),
    AnalysisType(MLAnalysisType),
    Version(ServiceApiVersion),
}

/// 按顺序绑定参数
pub fn bind_params<'q>(mut query: SqliteQuery<'q>, params: &[SqlParam]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            SqlParam::Text(value) => query.bind(value.clone()),
            SqlParam::Int(value) => query.bind(*value),
            SqlParam::Bool(value) => query.bind(*value),
            SqlParam::Time(value) => query.bind(*value),
            SqlParam::Level(value) => query.bind(*value),
            SqlParam::Status(value) => query.bind(*value),
            SqlParam::AnalysisType(value) => query.bind(*value),
            SqlParam::Version(value) => query.bind(*value),
        };
    }
    query
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// 转义 LIKE 通配符
fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn push_minute(clause: &mut String, params: &mut Vec<SqlParam>, column: &str, minute: MinuteMatch) {
    let (op, value) = match minute {
        MinuteMatch::Exact(m) => ("=", m),
        MinuteMatch::AtMost(m) => ("<=", m),
        MinuteMatch::AtLeast(m) => (">=", m),
    };
    clause.push_str(&format!(" AND {column} {op} ?"));
    params.push(SqlParam::Int(value));
}

/// 数据记录过滤条件
pub fn record_where(filter: &RecordFilter) -> (String, Vec<SqlParam>) {
    let mut clause = "identity_kind = ? AND identity_id = ?".to_string();
    let mut params = vec![
        SqlParam::Text(filter.identity.kind().to_string()),
        SqlParam::Text(filter.identity.id().to_string()),
    ];

    if let Some(minute) = filter.minute {
        push_minute(&mut clause, &mut params, "minute", minute);
    }

    if !filter.levels.is_empty() {
        clause.push_str(&format!(" AND level IN ({})", placeholders(filter.levels.len())));
        params.extend(filter.levels.iter().map(|l| SqlParam::Level(*l)));
    }

    if let Some(hosts) = &filter.hosts {
        if hosts.is_empty() {
            clause.push_str(" AND 0");
        } else {
            clause.push_str(&format!(" AND host IN ({})", placeholders(hosts.len())));
            params.extend(hosts.iter().map(|h| SqlParam::Text(h.clone())));
        }
    }

    if let Some(heartbeat) = filter.heartbeat {
        clause.push_str(" AND is_heartbeat = ?");
        params.push(SqlParam::Bool(heartbeat));
    }

    (clause, params)
}

/// 分析任务过滤条件
pub fn task_where(query: &TaskQuery) -> (String, Vec<SqlParam>) {
    let mut clause = "1=1".to_string();
    let mut params = Vec::new();

    if let Some(id) = &query.workflow_execution_id {
        clause.push_str(" AND workflow_execution_id = ?");
        params.push(SqlParam::Text(id.clone()));
    }

    if let Some(id) = &query.state_execution_id {
        clause.push_str(" AND state_execution_id = ?");
        params.push(SqlParam::Text(id.clone()));
    }

    if let Some(prefix) = &query.state_execution_prefix {
        clause.push_str(" AND state_execution_id LIKE ? ESCAPE '\\'");
        params.push(SqlParam::Text(format!("{}%", escape_like(prefix))));
    }

    if let Some(id) = &query.cv_config_id {
        clause.push_str(" AND cv_config_id = ?");
        params.push(SqlParam::Text(id.clone()));
    }

    if let Some(minute) = query.analysis_minute {
        push_minute(&mut clause, &mut params, "analysis_minute", minute);
    }

    if let Some(task_type) = query.ml_analysis_type {
        clause.push_str(" AND ml_analysis_type = ?");
        params.push(SqlParam::AnalysisType(task_type));
    }

    if let Some(level) = query.cluster_level {
        clause.push_str(" AND cluster_level = ?");
        params.push(SqlParam::Level(level));
    }

    if !query.statuses.is_empty() {
        clause.push_str(&format!(
            " AND execution_status IN ({})",
            placeholders(query.statuses.len())
        ));
        params.extend(query.statuses.iter().map(|s| SqlParam::Status(*s)));
    }

    (clause, params)
}

/// 可领取条件：QUEUED，或租约已过期的RUNNING
pub fn claim_where(criteria: &ClaimCriteria) -> (String, Vec<SqlParam>) {
    let clause = "version = ? AND retry <= ? AND (execution_status = ? OR (execution_status = ? AND last_updated_at < ?))".to_string();
    let params = vec![
        SqlParam::Version(criteria.version),
        SqlParam::Int(i64::from(criteria.max_retries)),
        SqlParam::Status(ExecutionStatus::Queued),
        SqlParam::Status(ExecutionStatus::Running),
        SqlParam::Time(criteria.stale_before),
    ];
    (clause, params)
}

/// 任务领取的附加过滤：持续验证标记与分析类型
pub fn claim_filter_where(filter: &ClaimFilter) -> (String, Vec<SqlParam>) {
    let mut clause = String::new();
    let mut params = Vec::new();

    if let Some(is_24x7) = filter.is_24x7 {
        clause.push_str(" AND is_24x7_task = ?");
        params.push(SqlParam::Bool(is_24x7));
    }

    match &filter.task_types {
        None => {
            clause.push_str(" AND ml_analysis_type != ?");
            params.push(SqlParam::AnalysisType(MLAnalysisType::FeedbackAnalysis));
        }
        Some(types) if types.is_empty() => {}
        Some(types) => {
            clause.push_str(&format!(" AND ml_analysis_type IN ({})", placeholders(types.len())));
            params.extend(types.iter().map(|t| SqlParam::AnalysisType(*t)));
        }
    }

    (clause, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use verifier_core::models::RecordIdentity;

    #[test]
    fn test_record_where_full_filter() {
        let filter = RecordFilter::new(RecordIdentity::state_execution("exec-1"))
            .minute(MinuteMatch::AtMost(42))
            .levels([ClusterLevel::L1, ClusterLevel::H1])
            .host("h1")
            .heartbeats_only();

        let (clause, params) = record_where(&filter);
        assert_eq!(
            clause,
            "identity_kind = ? AND identity_id = ? AND minute <= ? AND level IN (?, ?) AND host IN (?) AND is_heartbeat = ?"
        );
        assert_eq!(params.len(), 7);
        assert_eq!(params[2], SqlParam::Int(42));
    }

    #[test]
    fn test_claim_filter_default_excludes_feedback() {
        let (clause, params) = claim_filter_where(&ClaimFilter::default());
        assert_eq!(clause, " AND ml_analysis_type != ?");
        assert_eq!(params, vec![SqlParam::AnalysisType(MLAnalysisType::FeedbackAnalysis)]);

        let (clause, params) = claim_filter_where(&ClaimFilter::default().with_types(vec![]));
        assert!(clause.is_empty());
        assert!(params.is_empty());
    }

    #[test]
    fn test_prefix_is_escaped() {
        let query = TaskQuery {
            state_execution_prefix: Some("cv_1-retry-".to_string()),
            ..TaskQuery::default()
        };
        let (_, params) = task_where(&query);
        assert_eq!(params, vec![SqlParam::Text("cv\\_1-retry-%".to_string())]);
    }
}
