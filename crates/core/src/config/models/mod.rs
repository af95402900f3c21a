pub mod analysis;
pub mod app_config;
pub mod database;
pub mod observability;

pub use analysis::AnalysisConfig;
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use observability::ObservabilityConfig;
