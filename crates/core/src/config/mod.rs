//! 配置管理
//!
//! 加载顺序：内置默认值 → TOML配置文件 → 环境变量（前缀 `VERIFIER_`，层级分隔符 `__`）。

pub mod models;

#[cfg(test)]
mod tests;

pub use models::{AnalysisConfig, AppConfig, DatabaseConfig, ObservabilityConfig};
