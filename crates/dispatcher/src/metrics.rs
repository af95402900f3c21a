//! 调度与聚类流水线的计数器
//!
//! 未安装recorder时所有计数器都是空操作，二进制可选择安装Prometheus导出器。

use metrics::{counter, Counter};

#[derive(Clone)]
pub struct VerifierMetrics {
    tasks_enqueued_total: Counter,
    tasks_dropped_total: Counter,
    tasks_claimed_total: Counter,
    tasks_failed_total: Counter,
    records_ingested_total: Counter,
    ingest_rejected_total: Counter,
    level_advances_total: Counter,
    stale_records_deleted_total: Counter,
    backoff_skips_total: Counter,
}

impl VerifierMetrics {
    pub fn new() -> Self {
        Self {
            tasks_enqueued_total: counter!("verifier_tasks_enqueued_total"),
            tasks_dropped_total: counter!("verifier_tasks_dropped_total"),
            tasks_claimed_total: counter!("verifier_tasks_claimed_total"),
            tasks_failed_total: counter!("verifier_tasks_failed_total"),
            records_ingested_total: counter!("verifier_records_ingested_total"),
            ingest_rejected_total: counter!("verifier_ingest_rejected_total"),
            level_advances_total: counter!("verifier_level_advances_total"),
            stale_records_deleted_total: counter!("verifier_stale_records_deleted_total"),
            backoff_skips_total: counter!("verifier_backoff_skips_total"),
        }
    }

    pub fn record_task_enqueued(&self) {
        self.tasks_enqueued_total.increment(1);
    }

    /// 重复入队被丢弃
    pub fn record_task_dropped(&self) {
        self.tasks_dropped_total.increment(1);
    }

    pub fn record_task_claimed(&self) {
        self.tasks_claimed_total.increment(1);
    }

    pub fn record_task_failed(&self) {
        self.tasks_failed_total.increment(1);
    }

    pub fn record_ingested(&self, count: u64) {
        self.records_ingested_total.increment(count);
    }

    pub fn record_ingest_rejected(&self) {
        self.ingest_rejected_total.increment(1);
    }

    pub fn record_level_advance(&self) {
        self.level_advances_total.increment(1);
    }

    pub fn record_stale_deleted(&self, count: u64) {
        self.stale_records_deleted_total.increment(count);
    }

    pub fn record_backoff_skip(&self) {
        self.backoff_skips_total.increment(1);
    }
}

impl Default for VerifierMetrics {
    fn default() -> Self {
        Self::new()
    }
}
