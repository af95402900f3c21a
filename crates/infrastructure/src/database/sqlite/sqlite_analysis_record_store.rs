use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use verifier_core::models::{AnalysisRecord, AnalysisStatus, RecordIdentity};
use verifier_core::traits::AnalysisRecordStore;
use verifier_core::{VerifierError, VerifierResult};

use crate::error_handling::{database_error, RepositoryOperation};

const RECORD_COLUMNS: &str =
    "identity_kind, identity_id, analysis_minute, ml_analysis_type, status, summary, payload, created_at";

pub struct SqliteAnalysisRecordStore {
    pool: SqlitePool,
}

impl SqliteAnalysisRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> VerifierResult<AnalysisRecord> {
        let kind: String = row.try_get("identity_kind")?;
        let id: String = row.try_get("identity_id")?;
        let payload: String = row.try_get("payload")?;

        Ok(AnalysisRecord {
            identity: RecordIdentity::from_parts(&kind, id).ok_or_else(|| {
                VerifierError::Serialization(format!("Invalid record identity kind: {kind}"))
            })?,
            analysis_minute: row.try_get("analysis_minute")?,
            ml_analysis_type: row.try_get("ml_analysis_type")?,
            status: row.try_get("status")?,
            summary: row.try_get("summary")?,
            payload: serde_json::from_str(&payload)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl AnalysisRecordStore for SqliteAnalysisRecordStore {
    async fn insert(&self, record: &AnalysisRecord) -> VerifierResult<bool> {
        let result = sqlx::query(&format!(
            "INSERT OR IGNORE INTO analysis_records ({RECORD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(record.identity.kind())
        .bind(record.identity.id())
        .bind(record.analysis_minute)
        .bind(record.ml_analysis_type)
        .bind(record.status)
        .bind(&record.summary)
        .bind(serde_json::to_string(&record.payload)?)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error(RepositoryOperation::Create, "analysis_record", record.identity.id(), e))?;

        let inserted = result.rows_affected() > 0;
        debug!(
            "写入分析结果: {} 分钟 {} 新增 {}",
            record.identity, record.analysis_minute, inserted
        );
        Ok(inserted)
    }

    async fn get(
        &self,
        identity: &RecordIdentity,
        analysis_minute: i64,
        status: AnalysisStatus,
    ) -> VerifierResult<Option<AnalysisRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM analysis_records \
             WHERE identity_kind = ? AND identity_id = ? AND analysis_minute = ? AND status = ?"
        ))
        .bind(identity.kind())
        .bind(identity.id())
        .bind(analysis_minute)
        .bind(status)
        .fetch_optional(&self.pool)
        .await
        .map_err(VerifierError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_by_identity(&self, identity: &RecordIdentity) -> VerifierResult<Vec<AnalysisRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM analysis_records \
             WHERE identity_kind = ? AND identity_id = ? ORDER BY analysis_minute ASC"
        ))
        .bind(identity.kind())
        .bind(identity.id())
        .fetch_all(&self.pool)
        .await
        .map_err(VerifierError::Database)?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
