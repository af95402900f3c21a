#![allow(dead_code)]

use std::sync::Arc;

use verifier_core::config::AnalysisConfig;
use verifier_core::models::{LogDataRecord, MetricDataRecord};
use verifier_core::traits::VerificationStateClient;
use verifier_dispatcher::{
    AnalysisTaskQueue, BackoffScheduler, IngestionService, LogLevelAdvancer, MetricLevelAdvancer,
};
use verifier_infrastructure::{InMemoryAnalysisRecordStore, InMemoryRecordStore, InMemoryTaskStore};

/// 内存存储上组装好的完整流水线
pub struct Pipeline {
    pub tasks: Arc<InMemoryTaskStore>,
    pub logs: Arc<InMemoryRecordStore<LogDataRecord>>,
    pub metrics: Arc<InMemoryRecordStore<MetricDataRecord>>,
    pub analysis_records: Arc<InMemoryAnalysisRecordStore>,
    pub queue: Arc<AnalysisTaskQueue>,
    pub log_advancer: Arc<LogLevelAdvancer>,
    pub metric_advancer: Arc<MetricLevelAdvancer>,
    pub backoff: BackoffScheduler,
    pub ingestion: IngestionService,
}

impl Pipeline {
    pub fn new(state_client: Arc<dyn VerificationStateClient>) -> Self {
        let config = AnalysisConfig::default();
        let tasks = Arc::new(InMemoryTaskStore::new());
        let logs = Arc::new(InMemoryRecordStore::<LogDataRecord>::new());
        let metrics = Arc::new(InMemoryRecordStore::<MetricDataRecord>::new());
        let analysis_records = Arc::new(InMemoryAnalysisRecordStore::new());

        let queue = Arc::new(AnalysisTaskQueue::new(
            tasks.clone(),
            state_client.clone(),
            config.clone(),
        ));
        let log_advancer = Arc::new(LogLevelAdvancer::new(logs.clone(), queue.clone()));
        let metric_advancer = Arc::new(MetricLevelAdvancer::new(metrics.clone(), queue.clone()));
        let backoff = BackoffScheduler::new(tasks.clone(), config);
        let ingestion = IngestionService::new(
            state_client,
            queue.clone(),
            log_advancer.clone(),
            metric_advancer.clone(),
            analysis_records.clone(),
        );

        Self {
            tasks,
            logs,
            metrics,
            analysis_records,
            queue,
            log_advancer,
            metric_advancer,
            backoff,
            ingestion,
        }
    }
}
