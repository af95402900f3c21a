//! 内存仓储实现
//!
//! 适用于嵌入式部署与测试。每个写操作在同一把写锁内完成查找与修改，
//! 与SQLite实现的单语句原子性等价。

mod analysis_record_store;
mod context_store;
mod record_store;
mod task_store;

pub use analysis_record_store::InMemoryAnalysisRecordStore;
pub use context_store::InMemoryContextStore;
pub use record_store::InMemoryRecordStore;
pub use task_store::InMemoryTaskStore;
