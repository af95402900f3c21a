use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, instrument, warn};
use verifier_core::models::{AnalysisTask, ClaimFilter, ExecutionStatus, TaskIdentity};
use verifier_core::traits::{ClaimCriteria, InsertOutcome, TaskQuery, TaskStore};
use verifier_core::{VerifierError, VerifierResult};

use super::query_builder::{bind_params, claim_filter_where, claim_where, task_where, SqlParam};
use crate::error_handling::{database_error, RepositoryOperation};

const TASK_COLUMNS: &str = "id, state_execution_id, workflow_execution_id, cv_config_id, analysis_minute, \
     ml_analysis_type, cluster_level, group_name, version, tag, control_nodes, test_nodes, \
     execution_status, retry, is_24x7_task, service_guard_backoff_count, priority, created_at, last_updated_at";

pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> VerifierResult<AnalysisTask> {
        let control_nodes: String = row.try_get("control_nodes")?;
        let test_nodes: String = row.try_get("test_nodes")?;
        let retry = Self::count_column(row, "retry")?;
        let backoff = Self::count_column(row, "service_guard_backoff_count")?;

        Ok(AnalysisTask {
            id: row.try_get("id")?,
            state_execution_id: row.try_get("state_execution_id")?,
            workflow_execution_id: row.try_get("workflow_execution_id")?,
            cv_config_id: row.try_get("cv_config_id")?,
            analysis_minute: row.try_get("analysis_minute")?,
            ml_analysis_type: row.try_get("ml_analysis_type")?,
            cluster_level: row.try_get("cluster_level")?,
            group_name: row.try_get("group_name")?,
            version: row.try_get("version")?,
            tag: row.try_get("tag")?,
            control_nodes: serde_json::from_str::<BTreeSet<String>>(&control_nodes)?,
            test_nodes: serde_json::from_str::<BTreeSet<String>>(&test_nodes)?,
            execution_status: row.try_get("execution_status")?,
            retry,
            is_24x7_task: row.try_get("is_24x7_task")?,
            service_guard_backoff_count: backoff,
            priority: row.try_get("priority")?,
            created_at: row.try_get("created_at")?,
            last_updated_at: row.try_get("last_updated_at")?,
        })
    }

    fn count_column(row: &sqlx::sqlite::SqliteRow, column: &str) -> VerifierResult<u32> {
        let value: i64 = row.try_get(column)?;
        u32::try_from(value).map_err(|_| {
            VerifierError::Serialization(format!("字段 {column} 的值 {value} 超出计数范围"))
        })
    }

    async fn insert_on(conn: &mut SqliteConnection, task: &AnalysisTask) -> VerifierResult<()> {
        sqlx::query(&format!(
            "INSERT INTO analysis_tasks ({TASK_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&task.id)
        .bind(&task.state_execution_id)
        .bind(&task.workflow_execution_id)
        .bind(&task.cv_config_id)
        .bind(task.analysis_minute)
        .bind(task.ml_analysis_type)
        .bind(task.cluster_level)
        .bind(&task.group_name)
        .bind(task.version)
        .bind(&task.tag)
        .bind(serde_json::to_string(&task.control_nodes)?)
        .bind(serde_json::to_string(&task.test_nodes)?)
        .bind(task.execution_status)
        .bind(i64::from(task.retry))
        .bind(task.is_24x7_task)
        .bind(i64::from(task.service_guard_backoff_count))
        .bind(task.priority)
        .bind(task.created_at)
        .bind(task.last_updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| database_error(RepositoryOperation::Create, "analysis_task", &task.id, e))?;
        Ok(())
    }

    async fn latest_active_on(
        conn: &mut SqliteConnection,
        identity: &TaskIdentity,
        max_minute: i64,
    ) -> VerifierResult<Option<AnalysisTask>> {
        let mut sql = format!(
            "SELECT {TASK_COLUMNS} FROM analysis_tasks \
             WHERE state_execution_id = ? AND ml_analysis_type = ? AND cluster_level = ? \
             AND group_name = ? AND version = ? AND analysis_minute <= ? \
             AND execution_status IN (?, ?, ?)"
        );
        let mut params = vec![
            SqlParam::Text(identity.state_execution_id.clone()),
            SqlParam::AnalysisType(identity.ml_analysis_type),
            SqlParam::Level(identity.cluster_level),
            SqlParam::Text(identity.group_name.clone()),
            SqlParam::Version(identity.version),
            SqlParam::Int(max_minute),
        ];
        params.extend(ExecutionStatus::ACTIVE.iter().map(|s| SqlParam::Status(*s)));

        match &identity.tag {
            Some(tag) => {
                sql.push_str(" AND tag = ?");
                params.push(SqlParam::Text(tag.clone()));
            }
            None => sql.push_str(" AND tag IS NULL"),
        }

        if let Some(nodes) = &identity.control_nodes {
            sql.push_str(" AND control_nodes = ?");
            params.push(SqlParam::Text(serde_json::to_string(nodes)?));
        }

        sql.push_str(" ORDER BY analysis_minute DESC, last_updated_at DESC LIMIT 1");

        let row = bind_params(sqlx::query(&sql), &params)
            .fetch_optional(&mut *conn)
            .await
            .map_err(VerifierError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_unless_blocked(
        conn: &mut SqliteConnection,
        task: &AnalysisTask,
    ) -> VerifierResult<InsertOutcome> {
        let superseded =
            match Self::latest_active_on(conn, &task.identity(), task.analysis_minute).await? {
                None => None,
                Some(previous) if task.supersedes(&previous) => Some(previous.id),
                Some(previous) => return Ok(InsertOutcome::Blocked(previous)),
            };
        Self::insert_on(conn, task).await?;
        Ok(InsertOutcome::Inserted { superseded })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, task), fields(
        task_id = %task.id,
        state_execution_id = %task.state_execution_id,
        minute = task.analysis_minute,
        task_type = %task.ml_analysis_type,
    ))]
    async fn insert(&self, task: &AnalysisTask) -> VerifierResult<()> {
        let mut conn = self.pool.acquire().await.map_err(VerifierError::Database)?;
        Self::insert_on(&mut conn, task).await?;

        debug!("创建分析任务成功: ID {}", task.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> VerifierResult<Option<AnalysisTask>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM analysis_tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(VerifierError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_latest_active(
        &self,
        identity: &TaskIdentity,
        max_minute: i64,
    ) -> VerifierResult<Option<AnalysisTask>> {
        let mut conn = self.pool.acquire().await.map_err(VerifierError::Database)?;
        Self::latest_active_on(&mut conn, identity, max_minute).await
    }

    #[instrument(skip(self, task), fields(
        task_id = %task.id,
        state_execution_id = %task.state_execution_id,
        minute = task.analysis_minute,
    ))]
    async fn insert_if_absent(&self, task: &AnalysisTask) -> VerifierResult<InsertOutcome> {
        let mut conn = self.pool.acquire().await.map_err(VerifierError::Database)?;

        // IMMEDIATE 在检查之前取得写锁，同身份的并发入队依次执行
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| database_error(RepositoryOperation::Create, "analysis_task", &task.id, e))?;

        let result = match Self::insert_unless_blocked(&mut conn, task).await {
            Ok(outcome) => sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map(|_| outcome)
                .map_err(|e| database_error(RepositoryOperation::Create, "analysis_task", &task.id, e)),
            Err(error) => Err(error),
        };

        // 连接归还连接池前不能留下未结束的事务
        if result.is_err() {
            if let Err(rollback_error) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                warn!(error = %rollback_error, "回滚入队事务失败: {}", task.id);
            }
        }
        result
    }

    #[instrument(skip(self, criteria, filter), fields(version = %criteria.version, filter = ?filter))]
    async fn try_claim(
        &self,
        criteria: &ClaimCriteria,
        filter: &ClaimFilter,
    ) -> VerifierResult<Option<AnalysisTask>> {
        let (claim_clause, claim_params) = claim_where(criteria);
        let (filter_clause, filter_params) = claim_filter_where(filter);

        // 单条语句内完成选择与更新，并发领取者只有一个能命中同一行
        let sql = format!(
            "UPDATE analysis_tasks \
             SET execution_status = ?, retry = retry + 1, last_updated_at = ? \
             WHERE id = (SELECT id FROM analysis_tasks WHERE {claim_clause}{filter_clause} \
                         ORDER BY priority ASC, created_at ASC, rowid ASC LIMIT 1) \
             AND {claim_clause} \
             RETURNING {TASK_COLUMNS}"
        );

        let mut params = vec![
            SqlParam::Status(ExecutionStatus::Running),
            SqlParam::Time(criteria.now),
        ];
        params.extend(claim_params.iter().cloned());
        params.extend(filter_params);
        params.extend(claim_params);

        let row = bind_params(sqlx::query(&sql), &params)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| database_error(RepositoryOperation::Claim, "analysis_task", "-", e))?;

        match row {
            Some(row) => {
                let task = Self::row_to_task(&row)?;
                debug!("领取分析任务: {} 重试次数 {}", task.id, task.retry);
                Ok(Some(task))
            }
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
            "UPDATE analysis_tasks SET execution_status = ?, last_updated_at = ? \
             WHERE id = ? AND execution_status != ?",
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error(RepositoryOperation::Update, "analysis_task", id, e))?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM analysis_tasks WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(VerifierError::Database)?;
            if exists.is_none() {
                return Err(VerifierError::TaskNotFound { id: id.to_string() });
            }
            return Ok(false);
        }

        debug!("更新分析任务状态成功: ID {} -> {}", id, status);
        Ok(true)
    }

    async fn update_status_where(
        &self,
        query: &TaskQuery,
        status: ExecutionStatus,
        now: DateTime<Utc>,
    ) -> VerifierResult<u64> {
        let (clause, query_params) = task_where(query);
        let sql = format!(
            "UPDATE analysis_tasks SET execution_status = ?, last_updated_at = ? \
             WHERE {clause} AND execution_status != ?"
        );

        let mut params = vec![SqlParam::Status(status), SqlParam::Time(now)];
        params.extend(query_params);
        params.push(SqlParam::Status(status));

        let result = bind_params(sqlx::query(&sql), &params)
            .execute(&self.pool)
            .await
            .map_err(|e| database_error(RepositoryOperation::BatchUpdate, "analysis_task", "-", e))?;

        Ok(result.rows_affected())
    }

    async fn find(&self, query: &TaskQuery) -> VerifierResult<Vec<AnalysisTask>> {
        let (clause, params) = task_where(query);
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM analysis_tasks WHERE {clause} ORDER BY last_updated_at DESC"
        );

        let rows = bind_params(sqlx::query(&sql), &params)
            .fetch_all(&self.pool)
            .await
            .map_err(VerifierError::Database)?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn rename_state_execution(
        &self,
        id: &str,
        state_execution_id: &str,
        now: DateTime<Utc>,
    ) -> VerifierResult<bool> {
        let result = sqlx::query(
            "UPDATE analysis_tasks SET state_execution_id = ?, last_updated_at = ? WHERE id = ?",
        )
        .bind(state_execution_id)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| database_error(RepositoryOperation::Update, "analysis_task", id, e))?;

        Ok(result.rows_affected() > 0)
    }
}
