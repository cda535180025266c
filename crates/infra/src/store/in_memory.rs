use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use taskq_core::{JobId, JobRecord, JobStatus};

use super::{JobStats, JobStore, StoreError};

/// In-memory job store for tests/dev.
///
/// Records do not survive the process; use [`super::PostgresJobStore`] when they must.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, job: &JobRecord) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn put_if_status(&self, job: &JobRecord, expected: JobStatus) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        match jobs.get_mut(&job.id) {
            Some(current) if current.status == expected => {
                *current = job.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(jobs.get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        let mut result: Vec<_> = jobs.values().cloned().collect();
        // UUIDv7 ids break ties between records created in the same instant.
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let jobs = self.jobs.read().map_err(|_| poisoned())?;
        Ok(JobStats::from_records(jobs.values()))
    }
}
