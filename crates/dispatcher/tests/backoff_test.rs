mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use verifier_core::config::AnalysisConfig;
use verifier_core::models::{ExecutionStatus, MLAnalysisType, RecordIdentity};
use verifier_core::traits::TaskStore;
use verifier_dispatcher::{BackoffDecision, BackoffKey, BackoffScheduler};
use verifier_testing_utils::{AnalysisTaskBuilder, RecordingStateClient};

use common::Pipeline;

fn cv_state() -> String {
    RecordIdentity::cv_config("cv-1").task_state_execution_id()
}

fn key(minute: i64) -> BackoffKey {
    BackoffKey {
        state_execution_id: cv_state(),
        cv_config_id: "cv-1".to_string(),
        analysis_minute: minute,
        ml_analysis_type: MLAnalysisType::TimeSeries,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// 写入一条已归档的历史尝试
async fn archive_attempt(
    pipeline: &Pipeline,
    minute: i64,
    backoff_count: u32,
    at: DateTime<Utc>,
) -> Result<()> {
    let attempt = AnalysisTaskBuilder::new()
        .continuous("cv-1")
        .with_state_execution(&format!("{}-retry-{}", cv_state(), backoff_count))
        .with_type(MLAnalysisType::TimeSeries)
        .with_minute(minute)
        .with_backoff_count(backoff_count)
        .with_status(ExecutionStatus::Failed)
        .with_last_updated(at)
        .build();
    pipeline.tasks.insert(&attempt).await?;
    Ok(())
}

#[tokio::test]
async fn test_backoff_follows_fibonacci_until_limit() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));
    let far_future = t0() + Duration::days(1);

    let mut observed = Vec::new();
    for step in 0..6 {
        match pipeline.backoff.next_backoff(&key(100), far_future).await? {
            BackoffDecision::Eligible { backoff_count } => {
                observed.push(backoff_count);
                archive_attempt(&pipeline, 100, backoff_count, t0() + Duration::minutes(step)).await?;
            }
            BackoffDecision::Exhausted => break,
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    assert_eq!(observed, vec![1, 2, 3, 5, 8]);
    assert_eq!(
        pipeline.backoff.next_backoff(&key(100), far_future).await?,
        BackoffDecision::Exhausted
    );
    Ok(())
}

#[tokio::test]
async fn test_backoff_window_scales_with_previous_count() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));
    archive_attempt(&pipeline, 100, 3, t0()).await?;

    // 5分钟单位 × 计数3
    let eligible_at = t0() + Duration::minutes(15);
    assert_eq!(
        pipeline
            .backoff
            .next_backoff(&key(100), t0() + Duration::minutes(14))
            .await?,
        BackoffDecision::NotYet { eligible_at }
    );
    assert_eq!(
        pipeline.backoff.next_backoff(&key(100), eligible_at).await?,
        BackoffDecision::Eligible { backoff_count: 5 }
    );
    assert!(!pipeline.backoff.is_eligible(&key(100), t0()).await?);
    assert_eq!(
        pipeline.backoff.next_backoff_count(&key(100), eligible_at).await?,
        Some(5)
    );
    Ok(())
}

#[tokio::test]
async fn test_backoff_is_scoped_to_minute_and_type() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));
    archive_attempt(&pipeline, 100, 5, t0()).await?;

    assert_eq!(
        pipeline.backoff.next_backoff(&key(101), t0()).await?,
        BackoffDecision::Eligible { backoff_count: 1 }
    );

    let mut other_type = key(100);
    other_type.ml_analysis_type = MLAnalysisType::LogMl;
    assert_eq!(
        pipeline.backoff.next_backoff(&other_type, t0()).await?,
        BackoffDecision::Eligible { backoff_count: 1 }
    );

    let mut other_config = key(100);
    other_config.cv_config_id = "cv-2".to_string();
    assert!(pipeline.backoff.is_eligible(&other_config, t0()).await?);
    Ok(())
}

#[tokio::test]
async fn test_archived_failure_becomes_previous_attempt() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));
    let failed = AnalysisTaskBuilder::new()
        .continuous("cv-1")
        .with_type(MLAnalysisType::TimeSeries)
        .with_minute(100)
        .with_backoff_count(1)
        .with_status(ExecutionStatus::Failed)
        .build();
    pipeline.tasks.insert(&failed).await?;

    // 归档之前没有历史尝试
    assert_eq!(
        pipeline.backoff.next_backoff(&key(100), Utc::now()).await?,
        BackoffDecision::Eligible { backoff_count: 1 }
    );

    assert_eq!(pipeline.queue.archive_failed(&cv_state(), 100).await?, 1);
    assert!(matches!(
        pipeline.backoff.next_backoff(&key(100), Utc::now()).await?,
        BackoffDecision::NotYet { .. }
    ));
    assert_eq!(
        pipeline
            .backoff
            .next_backoff(&key(100), Utc::now() + Duration::minutes(10))
            .await?,
        BackoffDecision::Eligible { backoff_count: 2 }
    );
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_backoff_count_is_exhausted() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));
    archive_attempt(&pipeline, 100, u32::MAX, t0()).await?;

    let config = AnalysisConfig {
        backoff_limit: u32::MAX,
        ..AnalysisConfig::default()
    };
    let scheduler = BackoffScheduler::new(pipeline.tasks.clone(), config);
    assert_eq!(
        scheduler
            .next_backoff(&key(100), t0() + Duration::days(1))
            .await?,
        BackoffDecision::Exhausted
    );
    Ok(())
}
