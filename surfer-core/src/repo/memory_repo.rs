use crate::error::SurferResult;
use crate::models::Run;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::RunRecordRepository;

/// In-process repository for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryRunRepository {
    records: RwLock<HashMap<String, Run>>,
}

impl MemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RunRecordRepository for MemoryRunRepository {
    async fn get_by_id(&self, id: &str) -> SurferResult<Option<Run>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn get_all(&self) -> SurferResult<Vec<Run>> {
        let mut runs: Vec<Run> = self.records.read().values().cloned().collect();
        runs.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }

    async fn put(&self, run: &Run) -> SurferResult<()> {
        self.records.write().insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> SurferResult<bool> {
        Ok(self.records.write().remove(id).is_some())
    }
}
