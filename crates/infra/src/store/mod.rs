//! Durable job record store boundary.
//!
//! The engine only needs key-addressed persistence with read-your-writes from the
//! same process: `put`, `get` and `list_all` (newest first), plus a status-guarded
//! write so that two dispatchers holding duplicate broker entries cannot both claim
//! a job. Everything else (indexes, retention) is the adapter's business.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use taskq_core::{JobId, JobRecord, JobStatus};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("storage error: {0}")]
    Storage(String),
    /// A stored row could not be decoded into a valid job record
    /// (e.g. an out-of-range priority class written by another tool).
    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: JobId, reason: String },
}

/// Histogram of job statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed_permanent: usize,
}

impl JobStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a JobRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.add(record.status);
        }
        stats
    }

    pub fn add(&mut self, status: JobStatus) {
        self.add_count(status, 1);
    }

    pub fn add_count(&mut self, status: JobStatus, n: usize) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Running => self.running += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::FailedPermanent => self.failed_permanent += n,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed_permanent
    }
}

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite the record stored under `job.id`.
    async fn put(&self, job: &JobRecord) -> Result<(), StoreError>;

    /// Write `job` only if the stored record is currently in `expected` status.
    ///
    /// Returns `false` (and writes nothing) when the record is missing or in another
    /// status. The default implementation reads then writes and is not atomic;
    /// adapters shared by concurrent workers override it.
    async fn put_if_status(&self, job: &JobRecord, expected: JobStatus) -> Result<bool, StoreError> {
        match self.get(job.id).await? {
            Some(current) if current.status == expected => {
                self.put(job).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Load a record by id. `Ok(None)` when it does not exist.
    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError>;

    /// All records, newest `created_at` first.
    async fn list_all(&self) -> Result<Vec<JobRecord>, StoreError>;

    /// Status histogram over every stored record.
    async fn stats(&self) -> Result<JobStats, StoreError> {
        let records = self.list_all().await?;
        Ok(JobStats::from_records(&records))
    }

    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    async fn put(&self, job: &JobRecord) -> Result<(), StoreError> {
        (**self).put(job).await
    }

    async fn put_if_status(&self, job: &JobRecord, expected: JobStatus) -> Result<bool, StoreError> {
        (**self).put_if_status(job, expected).await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        (**self).get(id).await
    }

    async fn list_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        (**self).list_all().await
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        (**self).stats().await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }
}
