//! 验证流水线的持久化实现：SQLite（sqlx）与内存仓储

pub mod database;
pub mod error_handling;
pub mod memory;

pub use database::DatabaseManager;
pub use memory::{InMemoryAnalysisRecordStore, InMemoryContextStore, InMemoryRecordStore, InMemoryTaskStore};
