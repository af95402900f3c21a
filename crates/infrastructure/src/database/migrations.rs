use sqlx::SqlitePool;
use tracing::debug;
use verifier_core::VerifierResult;

/// 创建验证流水线所需的表与索引，可重复执行
pub async fn run_migrations(pool: &SqlitePool) -> VerifierResult<()> {
    debug!("Running SQLite database migrations");

    // 分析任务表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_tasks (
            id TEXT PRIMARY KEY,
            state_execution_id TEXT NOT NULL,
            workflow_execution_id TEXT,
            cv_config_id TEXT,
            analysis_minute INTEGER NOT NULL,
            ml_analysis_type TEXT NOT NULL,
            cluster_level TEXT NOT NULL,
            group_name TEXT NOT NULL DEFAULT 'default',
            version TEXT NOT NULL DEFAULT 'V1',
            tag TEXT,
            control_nodes TEXT NOT NULL DEFAULT '[]',
            test_nodes TEXT NOT NULL DEFAULT '[]',
            execution_status TEXT NOT NULL DEFAULT 'QUEUED',
            retry INTEGER NOT NULL DEFAULT 0,
            is_24x7_task INTEGER NOT NULL DEFAULT 0,
            service_guard_backoff_count INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL DEFAULT 1,
            created_at DATETIME NOT NULL,
            last_updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 日志数据记录表，心跳与数据共用
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS log_data_records (
            identity_kind TEXT NOT NULL,
            identity_id TEXT NOT NULL,
            host TEXT NOT NULL,
            minute INTEGER NOT NULL,
            level TEXT NOT NULL,
            is_heartbeat INTEGER NOT NULL,
            payload_key TEXT NOT NULL,
            query TEXT NOT NULL,
            cluster_label INTEGER NOT NULL,
            log_message TEXT NOT NULL,
            count INTEGER NOT NULL,
            created_at DATETIME NOT NULL,
            UNIQUE (identity_kind, identity_id, host, minute, level, payload_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 指标数据记录表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_data_records (
            identity_kind TEXT NOT NULL,
            identity_id TEXT NOT NULL,
            host TEXT NOT NULL,
            minute INTEGER NOT NULL,
            level TEXT NOT NULL,
            is_heartbeat INTEGER NOT NULL,
            payload_key TEXT NOT NULL,
            group_name TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            metric_values TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME NOT NULL,
            UNIQUE (identity_kind, identity_id, host, minute, level, payload_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 分析上下文表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_contexts (
            id TEXT PRIMARY KEY,
            state_execution_id TEXT NOT NULL,
            workflow_execution_id TEXT NOT NULL,
            app_id TEXT NOT NULL,
            service_id TEXT NOT NULL,
            state_type TEXT NOT NULL,
            control_nodes TEXT NOT NULL DEFAULT '{}',
            test_nodes TEXT NOT NULL DEFAULT '{}',
            time_duration_minutes INTEGER NOT NULL,
            start_data_collection_minute INTEGER NOT NULL,
            comparison_strategy TEXT NOT NULL,
            inspect_hosts_in_logs INTEGER NOT NULL DEFAULT 0,
            is_per_minute_absolute INTEGER NOT NULL DEFAULT 0,
            execution_status TEXT NOT NULL DEFAULT 'QUEUED',
            retry INTEGER NOT NULL DEFAULT 0,
            version TEXT NOT NULL DEFAULT 'V1',
            created_at DATETIME NOT NULL,
            last_updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // 分析结果表
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_records (
            identity_kind TEXT NOT NULL,
            identity_id TEXT NOT NULL,
            analysis_minute INTEGER NOT NULL,
            ml_analysis_type TEXT NOT NULL,
            status TEXT NOT NULL,
            summary TEXT,
            payload TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            UNIQUE (identity_kind, identity_id, analysis_minute, status)
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_analysis_tasks_claim ON analysis_tasks(execution_status, version, priority, created_at)",
        "CREATE INDEX IF NOT EXISTS idx_analysis_tasks_state_execution ON analysis_tasks(state_execution_id, analysis_minute)",
        "CREATE INDEX IF NOT EXISTS idx_analysis_tasks_cv_config ON analysis_tasks(cv_config_id, analysis_minute)",
        "CREATE INDEX IF NOT EXISTS idx_log_data_records_minute ON log_data_records(identity_kind, identity_id, minute, level)",
        "CREATE INDEX IF NOT EXISTS idx_metric_data_records_minute ON metric_data_records(identity_kind, identity_id, minute, level)",
        "CREATE INDEX IF NOT EXISTS idx_analysis_contexts_state_execution ON analysis_contexts(state_execution_id)",
        "CREATE INDEX IF NOT EXISTS idx_analysis_contexts_claim ON analysis_contexts(execution_status, version, created_at)",
    ];

    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    debug!("Successfully completed SQLite database migrations");
    Ok(())
}
