mod common;

use std::sync::Arc;

use anyhow::Result;
use verifier_core::models::{
    AnalysisTask, ClusterLevel, ComparisonStrategy, ExecutionStatus, LevelRecord, LogDataRecord,
    LogElement, MLAnalysisType, MetricDataRecord, MinuteMatch, RecordFilter, RecordIdentity,
    NON_HOST_PREVIOUS_ANALYSIS,
};
use verifier_core::traits::{RecordStore, TaskStore};
use verifier_core::VerifierError;
use verifier_dispatcher::{AdvanceOutcome, AdvanceRequest};
use verifier_testing_utils::{
    hosts, l0_batch, log_element, metric_heartbeat, metric_record, AnalysisContextBuilder,
    RecordingStateClient,
};

use common::Pipeline;

fn pipeline() -> Pipeline {
    Pipeline::new(Arc::new(RecordingStateClient::new()))
}

fn l0_records(identity: &RecordIdentity, host: &str, minute: i64) -> Vec<LogDataRecord> {
    l0_batch(host, minute, &["connection reset"])
        .iter()
        .map(|e| LogDataRecord::from_element(identity, ClusterLevel::L0, e))
        .collect()
}

async fn levels_at(
    pipeline: &Pipeline,
    identity: &RecordIdentity,
    minute: i64,
) -> Result<Vec<ClusterLevel>> {
    let records = pipeline
        .logs
        .find(&RecordFilter::new(identity.clone()).minute(MinuteMatch::Exact(minute)))
        .await?;
    Ok(records.iter().map(|r| r.level()).collect())
}

#[tokio::test]
async fn test_barrier_waits_for_every_expected_host() -> Result<()> {
    let pipeline = pipeline();
    let identity = RecordIdentity::state_execution("exec-1");

    let mut cluster_task = AnalysisTask::new("exec-1", 42, MLAnalysisType::LogCluster);
    cluster_task.cluster_level = ClusterLevel::L1;
    let cluster_task_id = cluster_task.id.clone();
    pipeline.queue.enqueue(cluster_task).await?;

    let request = AdvanceRequest::new(identity.clone(), 42, ClusterLevel::L0, ClusterLevel::L1)
        .with_expected_hosts(hosts(&["h1", "h2"]));

    pipeline
        .log_advancer
        .record_ingested(&l0_records(&identity, "h1", 42))
        .await?;
    match pipeline.log_advancer.try_advance(&request).await? {
        AdvanceOutcome::NotReady { missing } => assert_eq!(missing, hosts(&["h2"])),
        other => panic!("unexpected outcome: {other:?}"),
    }
    let before = levels_at(&pipeline, &identity, 42).await?;
    assert!(before.iter().all(|l| l.rank() == 0));

    pipeline
        .log_advancer
        .record_ingested(&l0_records(&identity, "h2", 42))
        .await?;
    assert_eq!(
        pipeline.log_advancer.try_advance(&request).await?,
        AdvanceOutcome::Advanced {
            moved: 2,
            heartbeats: 2,
            deleted: 0,
        }
    );

    let after = levels_at(&pipeline, &identity, 42).await?;
    assert_eq!(after.len(), 4);
    assert!(after.iter().all(|l| l.rank() == 1));

    let task = pipeline
        .tasks
        .get(&cluster_task_id)
        .await?
        .expect("task should exist");
    assert_eq!(task.execution_status, ExecutionStatus::Success);

    // 只有一次调用会执行迁移
    assert!(matches!(
        pipeline.log_advancer.try_advance(&request).await?,
        AdvanceOutcome::NotReady { .. }
    ));
    Ok(())
}

#[tokio::test]
async fn test_empty_expected_set_needs_any_heartbeat() -> Result<()> {
    let pipeline = pipeline();
    let identity = RecordIdentity::cv_config("cv-1");
    let request = AdvanceRequest::new(identity.clone(), 3, ClusterLevel::L0, ClusterLevel::L1);

    assert_eq!(
        pipeline.log_advancer.try_advance(&request).await?,
        AdvanceOutcome::NotReady {
            missing: hosts(&[]),
        }
    );

    pipeline
        .log_advancer
        .record_ingested(&l0_records(&identity, "h1", 3))
        .await?;
    assert!(matches!(
        pipeline.log_advancer.try_advance(&request).await?,
        AdvanceOutcome::Advanced { moved: 1, .. }
    ));
    Ok(())
}

#[tokio::test]
async fn test_levels_never_move_backwards() -> Result<()> {
    let pipeline = pipeline();
    let identity = RecordIdentity::state_execution("exec-1");
    let request = AdvanceRequest::new(identity, 1, ClusterLevel::L1, ClusterLevel::L0);

    let result = pipeline.log_advancer.try_advance(&request).await;
    assert!(matches!(
        result,
        Err(VerifierError::InvalidLevelTransition { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_single_host_advance_leaves_other_hosts() -> Result<()> {
    let pipeline = pipeline();
    let identity = RecordIdentity::state_execution("exec-1");
    pipeline
        .log_advancer
        .record_ingested(&l0_records(&identity, "h1", 8))
        .await?;
    pipeline
        .log_advancer
        .record_ingested(&l0_records(&identity, "h2", 8))
        .await?;

    let request = AdvanceRequest::new(identity.clone(), 8, ClusterLevel::L0, ClusterLevel::L1)
        .with_expected_hosts(hosts(&["h1"]))
        .with_host("h1");
    pipeline.log_advancer.try_advance(&request).await?;

    let h2_levels: Vec<ClusterLevel> = pipeline
        .logs
        .find(&RecordFilter::new(identity).host("h2"))
        .await?
        .iter()
        .map(|r| r.level)
        .collect();
    assert!(h2_levels.iter().all(|l| l.rank() == 0));
    Ok(())
}

#[tokio::test]
async fn test_stale_minute_is_deleted() -> Result<()> {
    let pipeline = pipeline();
    let identity = RecordIdentity::state_execution("exec-1");

    pipeline
        .logs
        .insert(&[LogDataRecord::heartbeat(identity.clone(), "h1", 42, ClusterLevel::L2)])
        .await?;
    assert_eq!(pipeline.log_advancer.finalize(&identity, 42).await?, 1);
    assert_eq!(
        pipeline.log_advancer.last_processed_minute(&identity).await?,
        Some(42)
    );

    pipeline
        .log_advancer
        .record_ingested(&l0_records(&identity, "h1", 41))
        .await?;
    let request = AdvanceRequest::new(identity.clone(), 41, ClusterLevel::L0, ClusterLevel::L1)
        .with_expected_hosts(hosts(&["h1"]));
    assert_eq!(
        pipeline.log_advancer.try_advance(&request).await?,
        AdvanceOutcome::Stale { deleted: 2 }
    );
    assert!(levels_at(&pipeline, &identity, 41).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_collapse_to_l2_clears_earlier_minutes() -> Result<()> {
    let pipeline = pipeline();
    let identity = RecordIdentity::state_execution("exec-1");

    let l1 = |host: &str, minute: i64, label: i32| {
        LogDataRecord::from_element(
            &identity,
            ClusterLevel::L1,
            &log_element(host, minute, label, "timeout"),
        )
    };
    pipeline
        .logs
        .insert(&[
            l1("h1", 40, 1),
            l1("h1", 41, 2),
            LogDataRecord::heartbeat(identity.clone(), "h1", 41, ClusterLevel::L1),
        ])
        .await?;

    let request = AdvanceRequest::new(identity.clone(), 41, ClusterLevel::L1, ClusterLevel::L2)
        .with_expected_hosts(hosts(&["h1"]));
    assert_eq!(
        pipeline.log_advancer.try_advance(&request).await?,
        AdvanceOutcome::Advanced {
            moved: 1,
            heartbeats: 1,
            deleted: 1,
        }
    );

    let remaining = pipeline.logs.all().await;
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|r| r.minute == 41 && r.level.rank() == 2));
    Ok(())
}

#[tokio::test]
async fn test_next_ready_minute() -> Result<()> {
    let pipeline = pipeline();
    let identity = RecordIdentity::state_execution("exec-1");
    let nodes = hosts(&["h1", "h2"]);

    for (host, minute) in [("h1", 5), ("h2", 5), ("h1", 6)] {
        pipeline
            .log_advancer
            .record_ingested(&[LogDataRecord::from_element(
                &identity,
                ClusterLevel::L0,
                &LogElement::heartbeat(host, minute),
            )])
            .await?;
    }

    assert_eq!(
        pipeline
            .log_advancer
            .next_ready_minute(&identity, ClusterLevel::L0, &nodes)
            .await?,
        Some(5)
    );

    let request = AdvanceRequest::new(identity.clone(), 5, ClusterLevel::L0, ClusterLevel::L1)
        .with_expected_hosts(nodes.clone());
    pipeline.log_advancer.try_advance(&request).await?;

    assert_eq!(
        pipeline
            .log_advancer
            .next_ready_minute(&identity, ClusterLevel::L0, &nodes)
            .await?,
        None
    );
    Ok(())
}

#[tokio::test]
async fn test_next_ready_minute_skips_processed_minutes() -> Result<()> {
    let pipeline = pipeline();
    let identity = RecordIdentity::state_execution("exec-1");

    pipeline
        .logs
        .insert(&[
            LogDataRecord::heartbeat(identity.clone(), "h1", 10, ClusterLevel::HF),
            LogDataRecord::heartbeat(identity.clone(), "h1", 9, ClusterLevel::L0),
            LogDataRecord::heartbeat(identity.clone(), "h1", 11, ClusterLevel::L0),
        ])
        .await?;

    assert_eq!(
        pipeline
            .log_advancer
            .next_ready_minute(&identity, ClusterLevel::L0, &hosts(&["h1"]))
            .await?,
        Some(11)
    );
    assert_eq!(pipeline.logs.all().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_processing_complete_relative_and_absolute() -> Result<()> {
    let pipeline = pipeline();

    let relative = AnalysisContextBuilder::new("exec-rel").with_duration(15).build();
    let identity = RecordIdentity::state_execution("exec-rel");
    assert!(!pipeline.log_advancer.is_processing_complete(&relative, 0).await?);

    pipeline
        .logs
        .insert(&[LogDataRecord::heartbeat(identity.clone(), "h1", 13, ClusterLevel::HF)])
        .await?;
    assert!(!pipeline.log_advancer.is_processing_complete(&relative, 0).await?);
    pipeline
        .logs
        .insert(&[LogDataRecord::heartbeat(identity, "h1", 14, ClusterLevel::HF)])
        .await?;
    assert!(pipeline.log_advancer.is_processing_complete(&relative, 0).await?);

    let absolute = AnalysisContextBuilder::new("exec-abs")
        .with_duration(15)
        .absolute_minutes(1000)
        .build();
    pipeline
        .logs
        .insert(&[LogDataRecord::heartbeat(
            RecordIdentity::state_execution("exec-abs"),
            "h1",
            1014,
            ClusterLevel::HF,
        )])
        .await?;
    assert!(pipeline.log_advancer.is_processing_complete(&absolute, 1000).await?);
    assert!(!pipeline.log_advancer.is_processing_complete(&absolute, 1001).await?);
    Ok(())
}

#[tokio::test]
async fn test_collected_nodes_by_strategy() -> Result<()> {
    let pipeline = pipeline();

    let current = AnalysisContextBuilder::new("exec-1")
        .with_control_nodes(&["c1"])
        .with_test_nodes(&["t1"])
        .build();
    assert_eq!(
        pipeline.log_advancer.collected_nodes(&current, ClusterLevel::L0).await?,
        hosts(&["c1", "t1"])
    );
    assert_eq!(
        pipeline.log_advancer.collected_nodes(&current, ClusterLevel::L2).await?,
        hosts(&["t1"])
    );

    let inspected = AnalysisContextBuilder::new("exec-1")
        .with_test_nodes(&["t1"])
        .with_strategy(ComparisonStrategy::CompareWithPrevious)
        .inspect_hosts()
        .build();
    assert_eq!(
        pipeline.log_advancer.collected_nodes(&inspected, ClusterLevel::L0).await?,
        hosts(&["t1"])
    );

    let previous = AnalysisContextBuilder::new("exec-2")
        .with_test_nodes(&["t1"])
        .with_strategy(ComparisonStrategy::CompareWithPrevious)
        .build();
    assert_eq!(
        pipeline.log_advancer.collected_nodes(&previous, ClusterLevel::L0).await?,
        hosts(&[NON_HOST_PREVIOUS_ANALYSIS])
    );

    let identity = RecordIdentity::state_execution("exec-2");
    pipeline
        .logs
        .insert(&[
            LogDataRecord::heartbeat(identity.clone(), NON_HOST_PREVIOUS_ANALYSIS, 3, ClusterLevel::L0),
            LogDataRecord::heartbeat(identity.clone(), "h9", 3, ClusterLevel::L0),
            LogDataRecord::heartbeat(identity, "h7", 4, ClusterLevel::L0),
        ])
        .await?;
    assert_eq!(
        pipeline.log_advancer.collected_nodes(&previous, ClusterLevel::L0).await?,
        hosts(&[NON_HOST_PREVIOUS_ANALYSIS, "h9"])
    );
    Ok(())
}

#[tokio::test]
async fn test_metric_track_advances_to_final() -> Result<()> {
    let pipeline = pipeline();
    let identity = RecordIdentity::cv_config("cv-1");

    let records: Vec<MetricDataRecord> = vec![
        metric_record(&identity, "h1", 5, 120.0),
        metric_heartbeat(&identity, "h1", 5),
    ];
    assert_eq!(pipeline.metric_advancer.record_ingested(&records).await?, 2);
    assert_eq!(pipeline.metric_advancer.record_ingested(&records).await?, 0);

    let request = AdvanceRequest::new(identity.clone(), 5, ClusterLevel::H0, ClusterLevel::HF)
        .with_expected_hosts(hosts(&["h1"]));
    assert_eq!(
        pipeline.metric_advancer.try_advance(&request).await?,
        AdvanceOutcome::Advanced {
            moved: 1,
            heartbeats: 1,
            deleted: 0,
        }
    );
    assert_eq!(
        pipeline.metric_advancer.last_processed_minute(&identity).await?,
        Some(5)
    );
    assert!(pipeline.metrics.all().await.iter().all(|r| r.level == ClusterLevel::HF));
    Ok(())
}
