pub mod query_builder;
pub mod sqlite_analysis_record_store;
pub mod sqlite_context_store;
pub mod sqlite_record_store;
pub mod sqlite_task_store;

pub use sqlite_analysis_record_store::SqliteAnalysisRecordStore;
pub use sqlite_context_store::SqliteContextStore;
pub use sqlite_record_store::{SqliteRecord, SqliteRecordStore};
pub use sqlite_task_store::SqliteTaskStore;
