use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use verifier_core::models::{ClusterLevel, LevelRecord, RecordFilter};
use verifier_core::traits::RecordStore;
use verifier_core::VerifierResult;

/// 内存数据记录仓储，日志与指标共用
#[derive(Debug, Clone)]
pub struct InMemoryRecordStore<R> {
    records: Arc<RwLock<Vec<R>>>,
}

impl<R> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

fn same_key<R: LevelRecord>(a: &R, b: &R) -> bool {
    a.identity() == b.identity()
        && a.host() == b.host()
        && a.minute() == b.minute()
        && a.level() == b.level()
        && a.payload_key() == b.payload_key()
}

impl<R: LevelRecord> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<R> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl<R: LevelRecord> RecordStore<R> for InMemoryRecordStore<R> {
    async fn insert(&self, records: &[R]) -> VerifierResult<u64> {
        let mut stored = self.records.write().await;
        let mut inserted = 0;
        for record in records {
            if !stored.iter().any(|existing| same_key(existing, record)) {
                stored.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn find(&self, filter: &RecordFilter) -> VerifierResult<Vec<R>> {
        let stored = self.records.read().await;
        Ok(stored.iter().filter(|r| filter.matches(*r)).cloned().collect())
    }

    async fn hosts(&self, filter: &RecordFilter) -> VerifierResult<BTreeSet<String>> {
        let stored = self.records.read().await;
        Ok(stored
            .iter()
            .filter(|r| filter.matches(*r))
            .map(|r| r.host().to_string())
            .collect())
    }

    async fn update_level(&self, filter: &RecordFilter, to: ClusterLevel) -> VerifierResult<u64> {
        let mut stored = self.records.write().await;
        let mut updated = 0;
        for index in 0..stored.len() {
            if !filter.matches(&stored[index]) {
                continue;
            }
            let mut moved = stored[index].clone();
            moved.set_level(to);
            // 目标级别上已有相同记录时保持原状
            if stored.iter().any(|existing| same_key(existing, &moved)) {
                continue;
            }
            stored[index] = moved;
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete(&self, filter: &RecordFilter) -> VerifierResult<u64> {
        let mut stored = self.records.write().await;
        let before = stored.len();
        stored.retain(|r| !filter.matches(r));
        Ok((before - stored.len()) as u64)
    }

    async fn min_minute(&self, filter: &RecordFilter) -> VerifierResult<Option<i64>> {
        let stored = self.records.read().await;
        Ok(stored.iter().filter(|r| filter.matches(*r)).map(|r| r.minute()).min())
    }

    async fn max_minute(&self, filter: &RecordFilter) -> VerifierResult<Option<i64>> {
        let stored = self.records.read().await;
        Ok(stored.iter().filter(|r| filter.matches(*r)).map(|r| r.minute()).max())
    }
}
