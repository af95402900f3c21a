//! 分析任务调度与多级聚类状态机
//!
//! - [`AnalysisTaskQueue`]: 原子领取、重试与超时回收
//! - [`ClusterLevelAdvancer`]: 心跳屏障与级别推进
//! - [`BackoffScheduler`]: 持续验证任务的斐波那契退避
//! - [`AnalysisContextService`]: 按验证执行领取的上下文
//! - [`IngestionService`]: 数据上报与学习引擎结果回报

pub mod backoff;
pub mod cluster_advancer;
pub mod context_queue;
pub mod ingestion;
pub mod metrics;
pub mod task_queue;

pub use backoff::{fib_successor, BackoffDecision, BackoffKey, BackoffScheduler};
pub use cluster_advancer::{
    AdvanceOutcome, AdvanceRequest, ClusterLevelAdvancer, LevelTrack, LogLevelAdvancer,
    MetricLevelAdvancer, Promotion,
};
pub use context_queue::AnalysisContextService;
pub use ingestion::{IngestOutcome, IngestRequest, IngestionService, TaskResult};
pub use metrics::VerifierMetrics;
pub use task_queue::{AnalysisTaskQueue, EnqueueOutcome};
