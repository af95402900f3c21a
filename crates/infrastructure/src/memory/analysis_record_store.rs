use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use verifier_core::models::{AnalysisRecord, AnalysisStatus, RecordIdentity};
use verifier_core::traits::AnalysisRecordStore;
use verifier_core::VerifierResult;

#[derive(Debug, Clone, Default)]
pub struct InMemoryAnalysisRecordStore {
    records: Arc<RwLock<Vec<AnalysisRecord>>>,
}

impl InMemoryAnalysisRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisRecordStore for InMemoryAnalysisRecordStore {
    async fn insert(&self, record: &AnalysisRecord) -> VerifierResult<bool> {
        let mut records = self.records.write().await;
        let duplicate = records.iter().any(|r| {
            r.identity == record.identity
                && r.analysis_minute == record.analysis_minute
                && r.status == record.status
        });
        if duplicate {
            return Ok(false);
        }
        records.push(record.clone());
        Ok(true)
    }

    async fn get(
        &self,
        identity: &RecordIdentity,
        analysis_minute: i64,
        status: AnalysisStatus,
    ) -> VerifierResult<Option<AnalysisRecord>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.identity == *identity && r.analysis_minute == analysis_minute && r.status == status)
            .cloned())
    }

    async fn find_by_identity(&self, identity: &RecordIdentity) -> VerifierResult<Vec<AnalysisRecord>> {
        let records = self.records.read().await;
        let mut found: Vec<AnalysisRecord> =
            records.iter().filter(|r| r.identity == *identity).cloned().collect();
        found.sort_by_key(|r| r.analysis_minute);
        Ok(found)
    }
}
