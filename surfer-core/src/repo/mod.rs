pub mod memory_repo;
pub mod run_repo;

pub use memory_repo::MemoryRunRepository;
pub use run_repo::SqliteRunRepository;

use crate::error::SurferResult;
use crate::models::Run;
use async_trait::async_trait;

/// Durable storage for whole Run trees, keyed by run id.
#[async_trait]
pub trait RunRecordRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> SurferResult<Option<Run>>;

    /// Every persisted Run, oldest `start_date` first.
    async fn get_all(&self) -> SurferResult<Vec<Run>>;

    /// Insert or replace the record for `run.id`.
    async fn put(&self, run: &Run) -> SurferResult<()>;

    async fn delete(&self, id: &str) -> SurferResult<bool>;
}
