pub mod manager;
pub mod migrations;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use sqlite::{
    SqliteAnalysisRecordStore, SqliteContextStore, SqliteRecord, SqliteRecordStore, SqliteTaskStore,
};
