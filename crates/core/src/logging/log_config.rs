use std::str::FromStr;

use crate::config::ObservabilityConfig;
use crate::logging::log_level::LogLevel;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: OutputFormat,
}

/// Output format for log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Pretty,
}

impl FromStr for OutputFormat {
    type Err = crate::errors::VerifierError;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "pretty" | "text" => Ok(OutputFormat::Pretty),
            _ => Err(crate::errors::VerifierError::Configuration(format!(
                "Invalid log format: {format}"
            ))),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: OutputFormat::Pretty,
        }
    }
}

impl LogConfig {
    /// 从可观测性配置构造，无法识别的取值回退到默认值
    pub fn from_observability(config: &ObservabilityConfig) -> Self {
        let defaults = Self::default();
        Self {
            level: config.log_level.parse().unwrap_or(defaults.level),
            format: config.log_format.parse().unwrap_or(defaults.format),
        }
    }

    /// 环境变量 `LOG_LEVEL` / `LOG_FORMAT` 覆盖
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            if let Ok(level) = level.parse::<LogLevel>() {
                self.level = level;
            }
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            if let Ok(format) = format.parse::<OutputFormat>() {
                self.format = format;
            }
        }

        self
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_observability() {
        let observability = ObservabilityConfig {
            log_level: "debug".to_string(),
            log_format: "json".to_string(),
            ..ObservabilityConfig::default()
        };
        let config = LogConfig::from_observability(&observability);
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, OutputFormat::Json);

        let observability = ObservabilityConfig {
            log_level: "chatty".to_string(),
            log_format: "xml".to_string(),
            ..ObservabilityConfig::default()
        };
        assert_eq!(LogConfig::from_observability(&observability), LogConfig::default());
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Pretty);
    }
}
