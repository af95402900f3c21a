use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use verifier_core::models::{
    ClusterLevel, LevelRecord, LogDataRecord, MetricDataRecord, RecordFilter, RecordIdentity,
};
use verifier_core::traits::RecordStore;
use verifier_core::{VerifierError, VerifierResult};

use super::query_builder::{bind_params, record_where, SqlParam, SqliteQuery};
use crate::error_handling::{database_error, RepositoryOperation};

const COMMON_COLUMNS: &str =
    "identity_kind, identity_id, host, minute, level, is_heartbeat, payload_key, created_at";

/// 可存入SQLite的数据记录
///
/// 公共列（身份、主机、分钟、级别、心跳标记、去重键）由通用实现处理，
/// 记录类型只负责自己的载荷列。
pub trait SqliteRecord: LevelRecord {
    const TABLE: &'static str;
    /// 与 `bind_payload` 的绑定顺序一致
    const PAYLOAD_COLUMNS: &'static [&'static str];

    fn bind_payload<'q>(&self, query: SqliteQuery<'q>) -> VerifierResult<SqliteQuery<'q>>;

    fn from_row(row: &SqliteRow, identity: RecordIdentity) -> VerifierResult<Self>;
}

impl SqliteRecord for LogDataRecord {
    const TABLE: &'static str = "log_data_records";
    const PAYLOAD_COLUMNS: &'static [&'static str] = &["query", "cluster_label", "log_message", "count"];

    fn bind_payload<'q>(&self, query: SqliteQuery<'q>) -> VerifierResult<SqliteQuery<'q>> {
        Ok(query
            .bind(self.query.clone())
            .bind(self.cluster_label)
            .bind(self.log_message.clone())
            .bind(self.count))
    }

    fn from_row(row: &SqliteRow, identity: RecordIdentity) -> VerifierResult<Self> {
        Ok(LogDataRecord {
            identity,
            host: row.try_get("host")?,
            minute: row.try_get("minute")?,
            level: row.try_get("level")?,
            query: row.try_get("query")?,
            cluster_label: row.try_get("cluster_label")?,
            log_message: row.try_get("log_message")?,
            count: row.try_get("count")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl SqliteRecord for MetricDataRecord {
    const TABLE: &'static str = "metric_data_records";
    const PAYLOAD_COLUMNS: &'static [&'static str] = &["group_name", "metric_name", "metric_values"];

    fn bind_payload<'q>(&self, query: SqliteQuery<'q>) -> VerifierResult<SqliteQuery<'q>> {
        Ok(query
            .bind(self.group_name.clone())
            .bind(self.metric_name.clone())
            .bind(serde_json::to_string(&self.values)?))
    }

    fn from_row(row: &SqliteRow, identity: RecordIdentity) -> VerifierResult<Self> {
        let values: String = row.try_get("metric_values")?;
        Ok(MetricDataRecord {
            identity,
            host: row.try_get("host")?,
            minute: row.try_get("minute")?,
            level: row.try_get("level")?,
            group_name: row.try_get("group_name")?,
            metric_name: row.try_get("metric_name")?,
            values: serde_json::from_str::<BTreeMap<String, f64>>(&values)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// SQLite数据记录仓储，日志与指标各用一张表
pub struct SqliteRecordStore<R> {
    pool: SqlitePool,
    _record: PhantomData<fn() -> R>,
}

impl<R: SqliteRecord> SqliteRecordStore<R> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _record: PhantomData,
        }
    }

    fn select_columns() -> String {
        let mut columns = COMMON_COLUMNS.to_string();
        for column in R::PAYLOAD_COLUMNS {
            columns.push_str(", ");
            columns.push_str(column);
        }
        columns
    }

    fn row_to_record(row: &SqliteRow) -> VerifierResult<R> {
        let kind: String = row.try_get("identity_kind")?;
        let id: String = row.try_get("identity_id")?;
        let identity = RecordIdentity::from_parts(&kind, id).ok_or_else(|| {
            VerifierError::Serialization(format!("Invalid record identity kind: {kind}"))
        })?;
        R::from_row(row, identity)
    }

    async fn aggregate_minute(&self, function: &str, filter: &RecordFilter) -> VerifierResult<Option<i64>> {
        let (clause, params) = record_where(filter);
        let sql = format!("SELECT {function}(minute) AS minute FROM {} WHERE {clause}", R::TABLE);

        let row = bind_params(sqlx::query(&sql), &params)
            .fetch_one(&self.pool)
            .await
            .map_err(VerifierError::Database)?;

        Ok(row.try_get::<Option<i64>, _>("minute")?)
    }
}

#[async_trait]
impl<R: SqliteRecord> RecordStore<R> for SqliteRecordStore<R> {
    #[instrument(skip(self, records), fields(table = R::TABLE, count = records.len()))]
    async fn insert(&self, records: &[R]) -> VerifierResult<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let payload_columns = R::PAYLOAD_COLUMNS.join(", ");
        let placeholders = vec!["?"; 8 + R::PAYLOAD_COLUMNS.len()].join(", ");
        let sql = format!(
            "INSERT OR IGNORE INTO {} ({COMMON_COLUMNS}, {payload_columns}) VALUES ({placeholders})",
            R::TABLE
        );

        let mut tx = self.pool.begin().await.map_err(VerifierError::Database)?;
        let mut inserted = 0;
        for record in records {
            let query = sqlx::query(&sql)
                .bind(record.identity().kind())
                .bind(record.identity().id().to_string())
                .bind(record.host().to_string())
                .bind(record.minute())
                .bind(record.level())
                .bind(record.is_heartbeat())
                .bind(record.payload_key())
                .bind(chrono::Utc::now());
            let result = record
                .bind_payload(query)?
                .execute(&mut *tx)
                .await
                .map_err(|e| database_error(RepositoryOperation::Create, R::TABLE, record.host(), e))?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(VerifierError::Database)?;

        debug!("写入数据记录 {} 条，新增 {} 条", records.len(), inserted);
        Ok(inserted)
    }

    async fn find(&self, filter: &RecordFilter) -> VerifierResult<Vec<R>> {
        let (clause, params) = record_where(filter);
        let sql = format!(
            "SELECT {} FROM {} WHERE {clause} ORDER BY minute ASC, host ASC",
            Self::select_columns(),
            R::TABLE
        );

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(VerifierError::Database)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn hosts(&self, filter: &RecordFilter) -> VerifierResult<BTreeSet<String>> {
        let (clause, params) = record_where(filter);
        let sql = format!("SELECT DISTINCT host FROM {} WHERE {clause}", R::TABLE);

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(VerifierError::Database)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("host").map_err(VerifierError::Database))
            .collect()
    }

    #[instrument(skip(self, filter), fields(table = R::TABLE, identity = %filter.identity, to = %to))]
    async fn update_level(&self, filter: &RecordFilter, to: ClusterLevel) -> VerifierResult<u64> {
        let (clause, filter_params) = record_where(filter);
        // 与目标级别上已有记录冲突的行保持原状
        let sql = format!("UPDATE OR IGNORE {} SET level = ? WHERE {clause}", R::TABLE);

        let mut params = vec![SqlParam::Level(to)];
        params.extend(filter_params);

        let result = bind_params(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error(RepositoryOperation::BatchUpdate, R::TABLE, filter.identity.id(), e))?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, filter: &RecordFilter) -> VerifierResult<u64> {
        let (clause, params) = record_where(filter);
        let sql = format!("DELETE FROM {} WHERE {clause}", R::TABLE);

        let result = bind_params(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error(RepositoryOperation::Delete, R::TABLE, filter.identity.id(), e))?;

        Ok(result.rows_affected())
    }

    async fn min_minute(&self, filter: &RecordFilter) -> VerifierResult<Option<i64>> {
        self.aggregate_minute("MIN", filter).await
    }

    async fn max_minute(&self, filter: &RecordFilter) -> VerifierResult<Option<i64>> {
        self.aggregate_minute("MAX", filter).await
    }
}
