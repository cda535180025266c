//! Job queue facade used by the API layer and by startup recovery.
//!
//! Submission writes the record first and only then inserts the broker entry, so a
//! dispatched id always has a record behind it. When the insert fails the record is
//! finalized as `failed_permanent` rather than left pending with no way to run.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{error, info, instrument, warn};

use taskq_core::{DomainError, JobId, JobKind, JobRecord, JobStatus, PriorityClass};

use crate::broker::{BrokerError, PriorityBroker};
use crate::store::{JobStats, JobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The record was stored but could not be enqueued; it is now `failed_permanent`.
    #[error("job {job_id} could not be enqueued: {source}")]
    Enqueue {
        job_id: JobId,
        #[source]
        source: BrokerError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Broker size plus the status histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queue_size: usize,
    pub status_counts: JobStats,
    pub total_jobs: usize,
}

/// Result of [`JobQueue::requeue_stalled`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// `running` jobs returned to `pending` and re-enqueued.
    pub recovered_running: usize,
    /// `pending` jobs re-enqueued.
    pub reenqueued_pending: usize,
}

#[derive(Debug, Clone)]
pub struct JobQueue<S, B> {
    store: S,
    broker: B,
}

impl<S, B> JobQueue<S, B>
where
    S: JobStore,
    B: PriorityBroker,
{
    pub fn new(store: S, broker: B) -> Self {
        Self { store, broker }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Store a new pending job and enqueue it. Returns the new id.
    #[instrument(skip_all, fields(kind = %kind, priority = %priority_class), err)]
    pub async fn submit(
        &self,
        kind: JobKind,
        priority_class: PriorityClass,
        payload: JsonValue,
    ) -> Result<JobId, SubmitError> {
        let mut job = JobRecord::new(kind, priority_class, payload);
        self.store.put(&job).await?;

        if let Err(source) = self.broker.insert(job.id, job.score()).await {
            job.abandon(format!("enqueue failed: {source}"))?;
            if let Err(e) = self.store.put(&job).await {
                error!(job_id = %job.id, error = %e, "failed to finalize job after enqueue failure");
            }
            return Err(SubmitError::Enqueue {
                job_id: job.id,
                source,
            });
        }

        info!(job_id = %job.id, kind = %job.kind, priority = %job.priority_class, "job submitted");
        Ok(job.id)
    }

    pub async fn get_status(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        self.store.get(id).await
    }

    /// Every job, newest first.
    pub async fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.store.list_all().await
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let queue_size = self.broker.size().await?;
        let status_counts = self.store.stats().await?;
        Ok(QueueStats {
            queue_size,
            status_counts,
            total_jobs: status_counts.total(),
        })
    }

    /// Ping both backends.
    pub async fn health(&self) -> Result<(), QueueError> {
        self.broker.ping().await?;
        self.store.ping().await?;
        Ok(())
    }

    /// Startup recovery for jobs a crashed worker left behind.
    ///
    /// `running` jobs go back to `pending`; every `pending` job gets a broker entry.
    /// Entries that already existed become duplicates, which dispatch drops as stale.
    /// Must not run while workers are active, or a live `running` job would be stolen.
    #[instrument(skip(self), err)]
    pub async fn requeue_stalled(&self) -> Result<RecoveryReport, QueueError> {
        let mut report = RecoveryReport::default();

        for mut job in self.store.list_all().await? {
            match job.status {
                JobStatus::Running => {
                    if let Err(e) = job.mark_requeued() {
                        warn!(job_id = %job.id, error = %e, "cannot requeue stalled job");
                        continue;
                    }
                    self.store.put(&job).await?;
                    self.broker.insert(job.id, job.score()).await?;
                    report.recovered_running += 1;
                }
                JobStatus::Pending => {
                    self.broker.insert(job.id, job.score()).await?;
                    report.reenqueued_pending += 1;
                }
                JobStatus::Completed | JobStatus::FailedPermanent => {}
            }
        }

        if report.recovered_running > 0 || report.reenqueued_pending > 0 {
            info!(
                recovered_running = report.recovered_running,
                reenqueued_pending = report.reenqueued_pending,
                "requeued stalled jobs"
            );
        }
        Ok(report)
    }
}
