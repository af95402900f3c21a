use chrono::Duration;
use serde::{Deserialize, Serialize};

/// 分析任务调度参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// 单个任务允许的最大领取次数
    pub max_retries: u32,
    /// RUNNING任务超过该时长未刷新即可被重新领取
    pub lease_timeout_seconds: u64,
    /// 持续验证退避计数上限，超过后该分钟被放弃
    pub backoff_limit: u32,
    pub backoff_unit_minutes: u32,
    pub default_priority: i32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            lease_timeout_seconds: 600,
            backoff_limit: 10,
            backoff_unit_minutes: 5,
            default_priority: 1,
        }
    }
}

impl AnalysisConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::seconds(self.lease_timeout_seconds as i64)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::minutes(i64::from(self.backoff_unit_minutes))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow::anyhow!("最大重试次数必须大于0"));
        }

        if self.lease_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务租约超时时间必须大于0"));
        }

        if self.backoff_limit == 0 {
            return Err(anyhow::anyhow!("退避上限必须大于0"));
        }

        if self.backoff_unit_minutes == 0 {
            return Err(anyhow::anyhow!("退避时间单位必须大于0"));
        }

        Ok(())
    }
}
