use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use verifier_core::models::{AnalysisContext, ExecutionStatus};
use verifier_core::traits::{ClaimCriteria, ContextStore};
use verifier_core::{VerifierError, VerifierResult};

use super::query_builder::{bind_params, claim_where, SqlParam};
use crate::error_handling::{database_error, RepositoryOperation};

const CONTEXT_COLUMNS: &str = "id, state_execution_id, workflow_execution_id, app_id, service_id, state_type, \
     control_nodes, test_nodes, time_duration_minutes, start_data_collection_minute, comparison_strategy, \
     inspect_hosts_in_logs, is_per_minute_absolute, execution_status, retry, version, created_at, last_updated_at";

pub struct SqliteContextStore {
    pool: SqlitePool,
}

impl SqliteContextStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_context(row: &sqlx::sqlite::SqliteRow) -> VerifierResult<AnalysisContext> {
        let control_nodes: String = row.try_get("control_nodes")?;
        let test_nodes: String = row.try_get("test_nodes")?;
        let retry: i64 = row.try_get("retry")?;
        let retry = u32::try_from(retry).map_err(|_| {
            VerifierError::Serialization(format!("分析上下文重试次数超出范围: {retry}"))
        })?;

        Ok(AnalysisContext {
            id: row.try_get("id")?,
            state_execution_id: row.try_get("state_execution_id")?,
            workflow_execution_id: row.try_get("workflow_execution_id")?,
            app_id: row.try_get("app_id")?,
            service_id: row.try_get("service_id")?,
            state_type: row.try_get("state_type")?,
            control_nodes: serde_json::from_str::<BTreeMap<String, String>>(&control_nodes)?,
            test_nodes: serde_json::from_str::<BTreeMap<String, String>>(&test_nodes)?,
            time_duration_minutes: row.try_get("time_duration_minutes")?,
            start_data_collection_minute: row.try_get("start_data_collection_minute")?,
            comparison_strategy: row.try_get("comparison_strategy")?,
            inspect_hosts_in_logs: row.try_get("inspect_hosts_in_logs")?,
            is_per_minute_absolute: row.try_get("is_per_minute_absolute")?,
            execution_status: row.try_get("execution_status")?,
            retry,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> VerifierResult<Option<AnalysisContext>> {
        let sql = format!(
            "SELECT {CONTEXT_COLUMNS} FROM analysis_contexts WHERE {column} = ? \
             ORDER BY created_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(VerifierError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_context(&row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    #[instrument(skip(self, context), fields(
        context_id = %context.id,
        state_execution_id = %context.state_execution_id,
    ))]
    async fn save(&self, context: &AnalysisContext) -> VerifierResult<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO analysis_contexts ({CONTEXT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&context.id)
        .bind(&context.state_execution_id)
        .bind(&context.workflow_execution_id)
        .bind(&context.app_id)
        .bind(&context.service_id)
        .bind(&context.state_type)
        .bind(serde_json::to_string(&context.control_nodes)?)
        .bind(serde_json::to_string(&context.test_nodes)?)
        .bind(context.time_duration_minutes)
        .bind(context.start_data_collection_minute)
        .bind(context.comparison_strategy)
        .bind(context.inspect_hosts_in_logs)
        .bind(context.is_per_minute_absolute)
        .bind(context.execution_status)
        .bind(i64::from(context.retry))
        .bind(context.version)
        .bind(context.created_at)
        .bind(context.last_updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error(RepositoryOperation::Create, "analysis_context", &context.id, e))?;

        debug!("保存分析上下文成功: ID {}", context.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> VerifierResult<Option<AnalysisContext>> {
        self.fetch_one_by("id", id).await
    }

    async fn get_by_state_execution(
        &self,
        state_execution_id: &str,
    ) -> VerifierResult<Option<AnalysisContext>> {
        self.fetch_one_by("state_execution_id", state_execution_id).await
    }

    async fn try_claim(&self, criteria: &ClaimCriteria) -> VerifierResult<Option<AnalysisContext>> {
        let (claim_clause, claim_params) = claim_where(criteria);
        let sql = format!(
            "UPDATE analysis_contexts \
             SET execution_status = ?, retry = retry + 1, last_updated_at = ? \
             WHERE id = (SELECT id FROM analysis_contexts WHERE {claim_clause} \
                         ORDER BY created_at ASC, rowid ASC LIMIT 1) \
             AND {claim_clause} \
             RETURNING {CONTEXT_COLUMNS}"
        );

        let mut params = vec![
            SqlParam::Status(ExecutionStatus::Running),
            SqlParam::Time(criteria.now),
        ];
        params.extend(claim_params.iter().cloned());
        params.extend(claim_params);

        let row = bind_params(sqlx::query(&sql), &params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error(RepositoryOperation::Claim, "analysis_context", "-", e))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_context(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> VerifierResult<bool> {
        let result = sqlx::query(
            "UPDATE analysis_contexts SET execution_status = ?, last_updated_at = ? \
             WHERE id = ? AND execution_status != ?",
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error(RepositoryOperation::Update, "analysis_context", id, e))?;

        if result.rows_affected() == 0 {
            if self.get(id).await?.is_none() {
                return Err(VerifierError::ContextNotFound { id: id.to_string() });
            }
            return Ok(false);
        }
        Ok(true)
    }
}
