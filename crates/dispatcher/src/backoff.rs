use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use verifier_core::{
    config::AnalysisConfig,
    models::{retry_prefix, MLAnalysisType, MinuteMatch},
    traits::{TaskQuery, TaskStore},
    VerifierResult,
};

use crate::metrics::VerifierMetrics;

/// 退避序列 `1, 2, 3, 5, 8, 13, ...` 中严格大于 `n` 的最小项
pub fn fib_successor(n: u32) -> u32 {
    let (mut current, mut next) = (1u32, 2u32);
    while current <= n {
        let sum = current.saturating_add(next);
        current = next;
        next = sum;
        if current == u32::MAX {
            break;
        }
    }
    current
}

/// 退避判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    Eligible { backoff_count: u32 },
    /// 上一次尝试的退避窗口尚未结束
    NotYet { eligible_at: DateTime<Utc> },
    /// 超过退避上限，该分钟被放弃
    Exhausted,
}

impl BackoffDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, BackoffDecision::Eligible { .. })
    }
}

/// 持续验证任务的退避键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffKey {
    pub state_execution_id: String,
    pub cv_config_id: String,
    pub analysis_minute: i64,
    pub ml_analysis_type: MLAnalysisType,
}

/// 持续验证（24x7）任务的斐波那契退避
///
/// 上一次尝试是被归档为 `{id}-retry-{n}` 的任务，`n` 即其退避计数。
pub struct BackoffScheduler {
    store: Arc<dyn TaskStore>,
    config: AnalysisConfig,
    metrics: VerifierMetrics,
}

impl BackoffScheduler {
    pub fn new(store: Arc<dyn TaskStore>, config: AnalysisConfig) -> Self {
        Self {
            store,
            config,
            metrics: VerifierMetrics::new(),
        }
    }

    pub async fn next_backoff(
        &self,
        key: &BackoffKey,
        now: DateTime<Utc>,
    ) -> VerifierResult<BackoffDecision> {
        let query = TaskQuery {
            state_execution_prefix: Some(retry_prefix(&key.state_execution_id)),
            cv_config_id: Some(key.cv_config_id.clone()),
            analysis_minute: Some(MinuteMatch::Exact(key.analysis_minute)),
            ml_analysis_type: Some(key.ml_analysis_type),
            ..TaskQuery::default()
        };

        let Some(previous) = self.store.find(&query).await?.into_iter().next() else {
            debug!(
                "配置 {} 分钟 {} 没有历史尝试，立即可调度",
                key.cv_config_id, key.analysis_minute
            );
            return Ok(BackoffDecision::Eligible { backoff_count: 1 });
        };

        let previous_count = previous.service_guard_backoff_count;
        let next = fib_successor(previous_count);
        if next > self.config.backoff_limit {
            info!(
                "配置 {} 分钟 {} 退避计数 {} 超过上限 {}，放弃该分钟",
                key.cv_config_id, key.analysis_minute, next, self.config.backoff_limit
            );
            self.metrics.record_backoff_skip();
            return Ok(BackoffDecision::Exhausted);
        }

        let eligible_at = i32::try_from(previous_count)
            .ok()
            .and_then(|units| self.config.backoff_unit().checked_mul(units))
            .and_then(|window| previous.last_updated_at.checked_add_signed(window));
        let Some(eligible_at) = eligible_at else {
            warn!(
                "配置 {} 分钟 {} 的历史退避计数 {} 超出可计算范围，放弃该分钟",
                key.cv_config_id, key.analysis_minute, previous_count
            );
            self.metrics.record_backoff_skip();
            return Ok(BackoffDecision::Exhausted);
        };
        if now >= eligible_at {
            return Ok(BackoffDecision::Eligible {
                backoff_count: next,
            });
        }

        info!(
            "配置 {} 分钟 {} 处于退避中，{} 之后可再次调度",
            key.cv_config_id, key.analysis_minute, eligible_at
        );
        self.metrics.record_backoff_skip();
        Ok(BackoffDecision::NotYet { eligible_at })
    }

    pub async fn is_eligible(&self, key: &BackoffKey, now: DateTime<Utc>) -> VerifierResult<bool> {
        Ok(self.next_backoff(key, now).await?.is_eligible())
    }

    /// 可调度时返回新任务应携带的退避计数
    pub async fn next_backoff_count(
        &self,
        key: &BackoffKey,
        now: DateTime<Utc>,
    ) -> VerifierResult<Option<u32>> {
        Ok(match self.next_backoff(key, now).await? {
            BackoffDecision::Eligible { backoff_count } => Some(backoff_count),
            BackoffDecision::NotYet { .. } | BackoffDecision::Exhausted => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fib_successor() {
        assert_eq!(fib_successor(0), 1);
        assert_eq!(fib_successor(1), 2);
        assert_eq!(fib_successor(2), 3);
        assert_eq!(fib_successor(3), 5);
        assert_eq!(fib_successor(4), 5);
        assert_eq!(fib_successor(8), 13);
    }

    #[test]
    fn test_fib_successor_saturates() {
        assert_eq!(fib_successor(u32::MAX), u32::MAX);
    }
}
