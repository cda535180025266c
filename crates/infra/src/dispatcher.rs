//! Dispatcher: promotes exactly one pending job to running.
//!
//! ```text
//! pop_min ─▶ load record ─▶ status == pending? ─▶ mark running ─▶ persist if still pending ─▶ job
//!    │             │                 │
//!   empty        missing          stale entry
//!    ▼             ▼                 ▼
//!  None    log, drop, None     drop, pop again
//! ```
//!
//! Popping is irreversible for the popped entry, so any persistence failure after the
//! pop re-inserts the entry before the error is returned. A record that can no longer
//! be decoded is dropped with an error log; re-inserting it would only spin.

use tracing::{debug, error, instrument, warn};

use taskq_core::{DomainError, JobId, JobRecord, JobStatus, Score};

use crate::broker::{BrokerError, PriorityBroker};
use crate::store::{JobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    /// The record refused the pending → running transition.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Anomalies the dispatcher resolved on its own. Reported so callers can count them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchAnomalies {
    pub lost: u64,
    pub stale: u64,
    pub corrupt: u64,
}

impl DispatchAnomalies {
    pub fn total(&self) -> u64 {
        self.lost + self.stale + self.corrupt
    }
}

/// Result of one [`Dispatcher::next_job`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// The job now in `running`, if any.
    pub job: Option<JobRecord>,
    pub anomalies: DispatchAnomalies,
}

#[derive(Debug, Clone)]
pub struct Dispatcher<S, B> {
    store: S,
    broker: B,
}

impl<S, B> Dispatcher<S, B>
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

    /// Claim the highest-priority pending job, if there is one.
    pub async fn next_job(&self) -> Result<Option<JobRecord>, DispatchError> {
        Ok(self.dispatch().await?.job)
    }

    /// Like [`Dispatcher::next_job`], also reporting the anomalies resolved on the way.
    #[instrument(skip(self), err)]
    pub async fn dispatch(&self) -> Result<Dispatched, DispatchError> {
        let mut anomalies = DispatchAnomalies::default();

        loop {
            let Some((id, score)) = self.broker.pop_min().await? else {
                return Ok(Dispatched { job: None, anomalies });
            };

            let mut job = match self.store.get(id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    warn!(job_id = %id, score = %score, "lost record: broker entry without a job record, dropping");
                    anomalies.lost += 1;
                    return Ok(Dispatched { job: None, anomalies });
                }
                Err(StoreError::Corrupt { id, reason }) => {
                    error!(job_id = %id, reason = %reason, "corrupt job record, dropping broker entry");
                    anomalies.corrupt += 1;
                    return Ok(Dispatched { job: None, anomalies });
                }
                Err(e) => {
                    self.compensate(id, score).await;
                    return Err(e.into());
                }
            };

            if job.status != JobStatus::Pending {
                debug!(job_id = %id, status = %job.status, "stale broker entry, dropping");
                anomalies.stale += 1;
                continue;
            }

            job.mark_running()?;
            match self.store.put_if_status(&job, JobStatus::Pending).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %id, "job claimed by another dispatcher, dropping entry");
                    anomalies.stale += 1;
                    continue;
                }
                Err(e) => {
                    self.compensate(id, score).await;
                    return Err(e.into());
                }
            }

            debug!(job_id = %id, kind = %job.kind, "job dispatched");
            return Ok(Dispatched {
                job: Some(job),
                anomalies,
            });
        }
    }

    /// Put a popped entry back after a failed persistence step.
    async fn compensate(&self, id: JobId, score: Score) {
        if let Err(e) = self.broker.insert(id, score).await {
            error!(job_id = %id, error = %e, "failed to re-insert broker entry after store failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use taskq_core::{JobKind, PriorityClass};

    use super::*;
    use crate::broker::InMemoryPriorityBroker;
    use crate::store::InMemoryJobStore;

    fn job(priority: PriorityClass) -> JobRecord {
        JobRecord::new(JobKind::new("send_email").unwrap(), priority, serde_json::json!({}))
    }

    async fn seeded(
        jobs: &[JobRecord],
    ) -> Dispatcher<Arc<InMemoryJobStore>, Arc<InMemoryPriorityBroker>> {
        let store = InMemoryJobStore::arc();
        let broker = InMemoryPriorityBroker::arc();
        for job in jobs {
            store.put(job).await.unwrap();
            broker.insert(job.id, job.score()).await.unwrap();
        }
        Dispatcher::new(store, broker)
    }

    #[tokio::test]
    async fn empty_broker_yields_none() {
        let dispatcher = seeded(&[]).await;
        assert!(dispatcher.next_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_highest_priority_and_persists_running() {
        let low = job(PriorityClass::Low);
        let high = job(PriorityClass::High);
        let dispatcher = seeded(&[low.clone(), high.clone()]).await;

        let claimed = dispatcher.next_job().await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());

        let stored = dispatcher.store().get(high.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(dispatcher.broker().size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn lost_record_is_dropped() {
        let dispatcher = seeded(&[]).await;
        let ghost = JobId::new();
        dispatcher.broker().insert(ghost, Score(1)).await.unwrap();

        let dispatched = dispatcher.dispatch().await.unwrap();
        assert!(dispatched.job.is_none());
        assert_eq!(dispatched.anomalies.lost, 1);
        assert_eq!(dispatcher.broker().size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_entries_are_skipped() {
        let mut done = job(PriorityClass::High);
        let waiting = job(PriorityClass::Low);
        let dispatcher = seeded(&[done.clone(), waiting.clone()]).await;

        done.mark_running().unwrap();
        done.mark_completed().unwrap();
        dispatcher.store().put(&done).await.unwrap();

        let dispatched = dispatcher.dispatch().await.unwrap();
        assert_eq!(dispatched.job.map(|j| j.id), Some(waiting.id));
        assert_eq!(dispatched.anomalies.stale, 1);

        let stored = dispatcher.store().get(done.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_entry_dispatches_once() {
        let only = job(PriorityClass::High);
        let dispatcher = seeded(&[only.clone()]).await;
        dispatcher.broker().insert(only.id, only.score()).await.unwrap();

        assert!(dispatcher.next_job().await.unwrap().is_some());
        assert!(dispatcher.next_job().await.unwrap().is_none());
    }

    /// Store whose writes can be switched off.
    struct FlakyStore {
        inner: InMemoryJobStore,
        fail_puts: AtomicBool,
    }

    #[async_trait]
    impl JobStore for FlakyStore {
        async fn put(&self, job: &JobRecord) -> Result<(), StoreError> {
            if self.fail_puts.load(Ordering::SeqCst) {
                return Err(StoreError::Storage("disk full".into()));
            }
            self.inner.put(job).await
        }

        async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
            self.inner.get(id).await
        }

        async fn list_all(&self) -> Result<Vec<JobRecord>, StoreError> {
            self.inner.list_all().await
        }
    }

    #[tokio::test]
    async fn failed_persist_reinserts_entry() {
        let pending = job(PriorityClass::High);
        let store = Arc::new(FlakyStore {
            inner: InMemoryJobStore::new(),
            fail_puts: AtomicBool::new(false),
        });
        store.put(&pending).await.unwrap();
        let broker = InMemoryPriorityBroker::arc();
        broker.insert(pending.id, pending.score()).await.unwrap();
        let dispatcher = Dispatcher::new(store.clone(), broker.clone());

        store.fail_puts.store(true, Ordering::SeqCst);
        let err = dispatcher.next_job().await.unwrap_err();
        assert!(matches!(err, DispatchError::Store(StoreError::Storage(_))));
        assert_eq!(broker.size().await.unwrap(), 1);
        assert_eq!(
            store.get(pending.id).await.unwrap().unwrap().status,
            JobStatus::Pending
        );

        store.fail_puts.store(false, Ordering::SeqCst);
        let claimed = dispatcher.next_job().await.unwrap().unwrap();
        assert_eq!(claimed.id, pending.id);
    }

    struct CorruptStore;

    #[async_trait]
    impl JobStore for CorruptStore {
        async fn put(&self, _job: &JobRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
            Err(StoreError::Corrupt {
                id,
                reason: "unknown priority class: \"urgent\"".into(),
            })
        }

        async fn list_all(&self) -> Result<Vec<JobRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn corrupt_record_is_dropped_not_retried() {
        let broker = InMemoryPriorityBroker::arc();
        broker.insert(JobId::new(), Score(1)).await.unwrap();
        let dispatcher = Dispatcher::new(CorruptStore, broker.clone());

        let dispatched = dispatcher.dispatch().await.unwrap();
        assert!(dispatched.job.is_none());
        assert_eq!(dispatched.anomalies.corrupt, 1);
        assert_eq!(broker.size().await.unwrap(), 0);
    }
}
