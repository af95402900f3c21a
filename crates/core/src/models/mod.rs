pub mod analysis_context;
pub mod analysis_record;
pub mod analysis_task;
pub mod cluster_level;
pub mod data_record;
mod sqlx_impls;

pub use analysis_context::{AnalysisContext, ComparisonStrategy};
pub use analysis_record::{AnalysisRecord, AnalysisStatus};
pub use analysis_task::{
    retry_prefix, AnalysisTask, ClaimFilter, ExecutionStatus, LearningEngineError, MLAnalysisType,
    ServiceApiVersion, TaskIdentity, DEFAULT_GROUP_NAME,
};
pub use cluster_level::ClusterLevel;
pub use data_record::{
    LevelRecord, LogDataRecord, LogElement, MetricDataRecord, MinuteMatch, RecordFilter,
    RecordIdentity, CV_24X7_STATE_EXECUTION, HEARTBEAT_METRIC_NAME, NON_HOST_PREVIOUS_ANALYSIS,
};
