mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use verifier_core::config::{AnalysisConfig, DatabaseConfig};
use verifier_core::models::{
    ClaimFilter, ClusterLevel, ExecutionStatus, LearningEngineError, MLAnalysisType,
    ServiceApiVersion,
};
use verifier_core::traits::{TaskQuery, TaskStore};
use verifier_dispatcher::{AnalysisTaskQueue, EnqueueOutcome};
use verifier_infrastructure::{DatabaseManager, InMemoryTaskStore};
use verifier_testing_utils::{AnalysisTaskBuilder, RecordingStateClient};

use common::Pipeline;

/// 模拟租约过期：把任务的最后更新时间拨回一小时前
async fn expire_lease(store: &InMemoryTaskStore, task_id: &str) -> Result<()> {
    let mut task = store.get(task_id).await?.expect("task should exist");
    task.last_updated_at = Utc::now() - Duration::hours(1);
    store.put(task).await;
    Ok(())
}

#[tokio::test]
async fn test_enqueue_drops_duplicate_identity() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));

    let first = AnalysisTaskBuilder::new().with_minute(5).build();
    assert!(pipeline.queue.enqueue(first).await?.is_created());

    let same_minute = AnalysisTaskBuilder::new().with_minute(5).build();
    assert!(matches!(
        pipeline.queue.enqueue(same_minute).await?,
        EnqueueOutcome::AlreadyScheduled { .. }
    ));

    // 更晚分钟的任务也不会在排队任务之外重复入队
    let later = AnalysisTaskBuilder::new().with_minute(6).build();
    assert!(matches!(
        pipeline.queue.enqueue(later).await?,
        EnqueueOutcome::AlreadyScheduled { .. }
    ));

    let other_type = AnalysisTaskBuilder::new()
        .with_minute(5)
        .with_type(MLAnalysisType::TimeSeries)
        .build();
    assert!(pipeline.queue.enqueue(other_type).await?.is_created());
    assert_eq!(pipeline.tasks.len().await, 2);
    Ok(())
}

#[tokio::test]
async fn test_enqueue_supersedes_earlier_success() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));

    let first = AnalysisTaskBuilder::new().with_minute(5).build();
    let first_id = first.id.clone();
    pipeline.queue.enqueue(first).await?;
    assert!(pipeline.queue.mark_completed(&first_id).await?);

    let next = AnalysisTaskBuilder::new().with_minute(6).build();
    match pipeline.queue.enqueue(next).await? {
        EnqueueOutcome::Superseded { task, previous_id } => {
            assert_eq!(previous_id, first_id);
            assert_eq!(task.execution_status, ExecutionStatus::Queued);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // 同一分钟的成功任务不会被取代
    let replay = AnalysisTaskBuilder::new().with_minute(5).build();
    let outcome = pipeline.queue.enqueue(replay).await?;
    assert!(outcome.inserted().is_none());
    Ok(())
}

#[tokio::test]
async fn test_enqueue_ignores_control_nodes_for_continuous_tasks() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));

    let first = AnalysisTaskBuilder::new()
        .continuous("cv-1")
        .with_minute(10)
        .with_control_nodes(&["c1"])
        .build();
    pipeline.queue.enqueue(first).await?;

    let moved_control = AnalysisTaskBuilder::new()
        .continuous("cv-1")
        .with_minute(10)
        .with_control_nodes(&["c2"])
        .build();
    assert!(!pipeline.queue.enqueue(moved_control).await?.is_created());

    let deployment_a = AnalysisTaskBuilder::new().with_minute(3).with_control_nodes(&["c1"]).build();
    let deployment_b = AnalysisTaskBuilder::new().with_minute(3).with_control_nodes(&["c2"]).build();
    assert!(pipeline.queue.enqueue(deployment_a).await?.is_created());
    assert!(pipeline.queue.enqueue(deployment_b).await?.is_created());
    Ok(())
}

#[tokio::test]
async fn test_concurrent_claims_single_winner() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));
    pipeline
        .queue
        .enqueue(AnalysisTaskBuilder::new().with_minute(42).build())
        .await?;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let queue = pipeline.queue.clone();
            tokio::spawn(async move {
                queue
                    .claim(ServiceApiVersion::V1, &ClaimFilter::default())
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for result in futures::future::join_all(handles).await {
        if result??.is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    Ok(())
}

#[tokio::test]
async fn test_claim_returns_post_update_task_and_respects_filters() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));
    let feedback = AnalysisTaskBuilder::new()
        .with_type(MLAnalysisType::FeedbackAnalysis)
        .build();
    pipeline.queue.enqueue(feedback).await?;

    assert!(pipeline
        .queue
        .claim(ServiceApiVersion::V1, &ClaimFilter::default())
        .await?
        .is_none());

    let everything = ClaimFilter::default().with_types(vec![]);
    let claimed = pipeline
        .queue
        .claim(ServiceApiVersion::V1, &everything)
        .await?
        .expect("feedback task should be claimable");
    assert_eq!(claimed.execution_status, ExecutionStatus::Running);
    assert_eq!(claimed.retry, 1);
    Ok(())
}

#[tokio::test]
async fn test_retry_bound_flips_task_to_failed() -> Result<()> {
    let client = RecordingStateClient::new();
    let pipeline = Pipeline::new(Arc::new(client.clone()));
    let task = AnalysisTaskBuilder::new().with_minute(42).build();
    let task_id = task.id.clone();
    pipeline.queue.enqueue(task).await?;

    for attempt in 1..=3 {
        let claimed = pipeline
            .queue
            .claim(ServiceApiVersion::V1, &ClaimFilter::default())
            .await?
            .expect("task should be claimable within the retry bound");
        assert_eq!(claimed.retry, attempt);
        expire_lease(&pipeline.tasks, &task_id).await?;
    }

    assert!(pipeline
        .queue
        .claim(ServiceApiVersion::V1, &ClaimFilter::default())
        .await?
        .is_none());

    let task = pipeline.tasks.get(&task_id).await?.expect("task should exist");
    assert_eq!(task.execution_status, ExecutionStatus::Failed);
    assert_eq!(task.retry, 4);

    let failures = client.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "exec-1");
    assert_eq!(failures[0].1.analysis_minute, 42);

    // FAILED是终态，之后不会再被领取
    assert!(pipeline
        .queue
        .claim(ServiceApiVersion::V1, &ClaimFilter::default())
        .await?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn test_notify_failure_requeues_until_retries_used() -> Result<()> {
    let client = RecordingStateClient::new();
    let pipeline = Pipeline::new(Arc::new(client.clone()));
    let task = AnalysisTaskBuilder::new().with_minute(7).build();
    let task_id = task.id.clone();
    pipeline.queue.enqueue(task).await?;

    let error = LearningEngineError {
        analysis_minute: 7,
        error_msg: "learning engine unavailable".to_string(),
    };

    for expected in [
        ExecutionStatus::Queued,
        ExecutionStatus::Queued,
        ExecutionStatus::Failed,
    ] {
        pipeline
            .queue
            .claim(ServiceApiVersion::V1, &ClaimFilter::default())
            .await?
            .expect("task should be queued again");
        assert_eq!(pipeline.queue.notify_failure(&task_id, &error).await?, expected);
    }

    assert_eq!(client.failures().len(), 1);
    assert!(pipeline.queue.notify_failure("missing", &error).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_mark_completed_is_idempotent() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));
    let task = AnalysisTaskBuilder::new()
        .with_type(MLAnalysisType::LogCluster)
        .with_level(ClusterLevel::L1)
        .with_minute(3)
        .build();
    let task_id = task.id.clone();
    pipeline.queue.enqueue(task).await?;

    let updated = pipeline
        .queue
        .mark_completed_for(None, "exec-1", 3, MLAnalysisType::LogCluster, ClusterLevel::L1)
        .await?;
    assert_eq!(updated, 1);
    assert_eq!(
        pipeline
            .queue
            .mark_completed_for(None, "exec-1", 3, MLAnalysisType::LogCluster, ClusterLevel::L1)
            .await?,
        0
    );
    assert!(!pipeline.queue.mark_completed(&task_id).await?);
    Ok(())
}

#[tokio::test]
async fn test_has_timed_out_and_running_checks() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));

    let stuck = AnalysisTaskBuilder::new()
        .with_workflow_execution("wf-1")
        .with_status(ExecutionStatus::Running)
        .with_retry(3)
        .build();
    let healthy = AnalysisTaskBuilder::new()
        .with_workflow_execution("wf-2")
        .with_status(ExecutionStatus::Running)
        .with_retry(1)
        .build();
    pipeline.tasks.insert(&stuck).await?;
    pipeline.tasks.insert(&healthy).await?;

    assert!(pipeline.queue.has_timed_out("wf-1", "exec-1").await?);
    assert!(!pipeline.queue.has_timed_out("wf-2", "exec-1").await?);

    let continuous = AnalysisTaskBuilder::new().continuous("cv-1").with_minute(20).build();
    pipeline.queue.enqueue(continuous).await?;
    assert!(pipeline.queue.is_task_running_or_queued("cv-1", None).await?);
    assert!(pipeline.queue.is_task_running_or_queued("cv-1", Some(20)).await?);
    assert!(!pipeline.queue.is_task_running_or_queued("cv-1", Some(21)).await?);
    assert!(!pipeline.queue.is_task_running_or_queued("cv-2", None).await?);
    Ok(())
}

#[tokio::test]
async fn test_archive_failed_frees_identity() -> Result<()> {
    let pipeline = Pipeline::new(Arc::new(RecordingStateClient::new()));
    let failed = AnalysisTaskBuilder::new()
        .continuous("cv-1")
        .with_type(MLAnalysisType::TimeSeries)
        .with_minute(100)
        .with_backoff_count(2)
        .with_status(ExecutionStatus::Failed)
        .build();
    let state_execution_id = failed.state_execution_id.clone();
    let failed_id = failed.id.clone();
    pipeline.tasks.insert(&failed).await?;

    let running = AnalysisTaskBuilder::new()
        .continuous("cv-1")
        .with_minute(100)
        .with_status(ExecutionStatus::Running)
        .with_retry(1)
        .build();
    pipeline.tasks.insert(&running).await?;

    assert_eq!(pipeline.queue.archive_failed(&state_execution_id, 100).await?, 1);
    let archived = pipeline.tasks.get(&failed_id).await?.expect("task should exist");
    assert_eq!(
        archived.state_execution_id,
        format!("{state_execution_id}-retry-2")
    );

    let retry = AnalysisTaskBuilder::new()
        .continuous("cv-1")
        .with_type(MLAnalysisType::TimeSeries)
        .with_minute(100)
        .build();
    assert!(pipeline.queue.enqueue(retry).await?.is_created());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_on_sqlite_keeps_single_task() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("verifier.db").display()),
        max_connections: 8,
        ..DatabaseConfig::default()
    };
    let database = DatabaseManager::new(&config).await?;
    database.migrate().await?;

    let store = database.task_store();
    let queue = Arc::new(AnalysisTaskQueue::new(
        store.clone(),
        Arc::new(RecordingStateClient::new()),
        AnalysisConfig::default(),
    ));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .enqueue(AnalysisTaskBuilder::new().with_minute(42).build())
                    .await
            })
        })
        .collect();

    let mut created = 0;
    for result in futures::future::join_all(handles).await {
        if result??.is_created() {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(store.find(&TaskQuery::default()).await?.len(), 1);
    database.close().await;
    Ok(())
}
