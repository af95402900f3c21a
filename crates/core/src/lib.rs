//! 持续验证分析流水线核心库
//!
//! 数据模型、错误类型、仓储与外部协作方接口、配置与日志配置。

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::{AnalysisConfig, AppConfig, DatabaseConfig, ObservabilityConfig};
pub use errors::*;
pub use logging::{LogConfig, LogLevel, OutputFormat};
