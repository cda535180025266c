//! Worker loop: dispatch, execute, then complete, retry or give up.
//!
//! One iteration ([`Worker::run_once`]):
//!
//! 1. Ask the [`Dispatcher`] for the next job; report [`IterationOutcome::Idle`] if none.
//! 2. Execute it through the [`ExecutorRegistry`] failure boundary.
//! 3. Success: `completed`, persisted.
//! 4. Failure: the failure snapshot (attempt count, error, finish time) is persisted
//!    first, then either
//!    - the worker sleeps `backoff(attempt)`, returns the job to `pending` and
//!      re-inserts it with its original score, or
//!    - the job becomes `failed_permanent` and is handed to the [`FailureSink`].
//!
//! The backoff sleep blocks this worker, and it is the only place an iteration
//! waits. It is interrupted by shutdown, in which case the job is requeued at once.
//! If the re-insert keeps failing after a few quick retries, the job is abandoned as
//! `failed_permanent` (`requeue failed: ...`) and the broker error is returned.
//!
//! Any store or broker error aborts the iteration and is returned; [`Worker::run`]
//! logs it and keeps going. Whatever was last persisted stays the truth for that job.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use taskq_core::{DomainError, JobId, JobRecord, RetryPolicy};

use crate::broker::{BrokerError, PriorityBroker};
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::executor::{ExecutionOutcome, ExecutorRegistry, FailureCause};
use crate::sink::{FailureSink, TracingFailureSink};
use crate::store::{JobStore, StoreError};

/// What to do with a job whose kind has no registered handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownKindPolicy {
    /// Treat it like any other failure: consume an attempt and back off.
    #[default]
    ConsumeRetry,
    /// Fail the job permanently on the first attempt.
    FailFast,
}

impl UnknownKindPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            UnknownKindPolicy::ConsumeRetry => "consume_retry",
            UnknownKindPolicy::FailFast => "fail_fast",
        }
    }
}

impl core::str::FromStr for UnknownKindPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "consume_retry" => Ok(UnknownKindPolicy::ConsumeRetry),
            "fail_fast" => Ok(UnknownKindPolicy::FailFast),
            other => Err(DomainError::validation(format!(
                "unknown-kind policy must be consume_retry or fail_fast, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Used as the `worker` field on every log line.
    pub name: String,
    /// How long to wait when the broker is empty.
    pub poll_interval: Duration,
    pub retry_policy: RetryPolicy,
    pub unknown_kind: UnknownKindPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            poll_interval: Duration::from_secs(2),
            retry_policy: RetryPolicy::default(),
            unknown_kind: UnknownKindPolicy::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Nothing to dispatch.
    Idle,
    Completed(JobId),
    /// Failed, backed off and re-enqueued.
    Retried { id: JobId, attempt: u32 },
    FailedPermanent(JobId),
    /// Failed with retries left, but shutdown arrived during the backoff. The job was
    /// re-enqueued without finishing the sleep.
    Interrupted(JobId),
}

/// Counters shared between a running worker and its handle.
#[derive(Debug, Default)]
pub struct WorkerStats {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed_permanent: AtomicU64,
    anomalies: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub dispatched: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed_permanent: u64,
    pub anomalies: u64,
    pub errors: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed_permanent: self.failed_permanent.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

pub struct Worker<S, B> {
    dispatcher: Dispatcher<S, B>,
    registry: ExecutorRegistry,
    sink: Arc<dyn FailureSink>,
    config: WorkerConfig,
    stats: Arc<WorkerStats>,
}

impl<S, B> std::fmt::Debug for Worker<S, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, B> Worker<S, B>
where
    S: JobStore + 'static,
    B: PriorityBroker + 'static,
{
    pub fn new(store: S, broker: B, registry: ExecutorRegistry, config: WorkerConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(store, broker),
            registry,
            sink: Arc::new(TracingFailureSink),
            config,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Replace the default [`TracingFailureSink`].
    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Run the loop on a tokio task.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats();
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    /// Iterate until `shutdown` turns `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let name = self.config.name.clone();
        info!(worker = %name, kinds = ?self.registry.kinds(), "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once(&mut shutdown).await {
                Ok(IterationOutcome::Idle) => {
                    if wait_or_shutdown(&mut shutdown, self.config.poll_interval).await {
                        break;
                    }
                }
                Ok(IterationOutcome::Interrupted(id)) => {
                    info!(worker = %name, job_id = %id, "job requeued on shutdown");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    WorkerStats::bump(&self.stats.errors, 1);
                    error!(worker = %name, error = %e, "worker iteration failed");
                    if wait_or_shutdown(&mut shutdown, self.config.poll_interval).await {
                        break;
                    }
                }
            }
        }

        info!(worker = %name, stats = ?self.stats.snapshot(), "worker stopped");
    }

    /// One dispatch/execute/settle cycle.
    ///
    /// `shutdown` is only consulted during the backoff sleep.
    pub async fn run_once(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<IterationOutcome, WorkerError> {
        let dispatched = self.dispatcher.dispatch().await?;
        WorkerStats::bump(&self.stats.anomalies, dispatched.anomalies.total());

        let Some(job) = dispatched.job else {
            return Ok(IterationOutcome::Idle);
        };
        WorkerStats::bump(&self.stats.dispatched, 1);

        let outcome = self.registry.execute(&job.kind, &job.payload).await;
        self.settle(job, outcome, shutdown).await
    }

    async fn settle(
        &self,
        mut job: JobRecord,
        outcome: ExecutionOutcome,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<IterationOutcome, WorkerError> {
        let worker = &self.config.name;
        let store = self.dispatcher.store();

        let (cause, error) = match outcome {
            ExecutionOutcome::Succeeded => {
                job.mark_completed()?;
                store.put(&job).await?;
                WorkerStats::bump(&self.stats.succeeded, 1);
                info!(worker = %worker, job_id = %job.id, kind = %job.kind, attempts = job.attempt_count, "job completed");
                return Ok(IterationOutcome::Completed(job.id));
            }
            ExecutionOutcome::Failed { cause, error } => (cause, error),
        };

        job.record_failure(error.as_str())?;
        store.put(&job).await?;

        let policy = &self.config.retry_policy;
        let retry = match cause {
            FailureCause::UnknownKind => {
                error!(worker = %worker, job_id = %job.id, kind = %job.kind, "no handler registered for job kind");
                self.config.unknown_kind == UnknownKindPolicy::ConsumeRetry
                    && policy.should_retry(job.attempt_count)
            }
            _ => policy.should_retry(job.attempt_count),
        };

        if !retry {
            job.mark_failed_permanent()?;
            store.put(&job).await?;
            WorkerStats::bump(&self.stats.failed_permanent, 1);
            if let Err(e) = self.sink.record(&job).await {
                error!(worker = %worker, job_id = %job.id, error = %e, "failed to record permanent failure");
            }
            return Ok(IterationOutcome::FailedPermanent(job.id));
        }

        let delay = policy.backoff(job.attempt_count).unwrap_or_default();
        warn!(
            worker = %worker,
            job_id = %job.id,
            kind = %job.kind,
            attempt = job.attempt_count,
            backoff_ms = delay.as_millis() as u64,
            error = %error,
            "job failed, retrying after backoff"
        );
        let interrupted = wait_or_shutdown(shutdown, delay).await;

        job.mark_requeued()?;
        store.put(&job).await?;
        if let Err(e) = self.reinsert(&job).await {
            // A pending record without a broker entry would never be dispatched again.
            job.abandon(format!("requeue failed: {e}"))?;
            if let Err(put_err) = store.put(&job).await {
                error!(worker = %worker, job_id = %job.id, error = %put_err, "failed to finalize job after requeue failure");
            }
            WorkerStats::bump(&self.stats.failed_permanent, 1);
            if let Err(sink_err) = self.sink.record(&job).await {
                error!(worker = %worker, job_id = %job.id, error = %sink_err, "failed to record permanent failure");
            }
            return Err(e.into());
        }
        WorkerStats::bump(&self.stats.retried, 1);
        debug!(worker = %worker, job_id = %job.id, "job re-enqueued");

        if interrupted {
            Ok(IterationOutcome::Interrupted(job.id))
        } else {
            Ok(IterationOutcome::Retried {
                id: job.id,
                attempt: job.attempt_count,
            })
        }
    }

    /// Re-insert a requeued job, retrying transient broker errors a few times.
    async fn reinsert(&self, job: &JobRecord) -> Result<(), BrokerError> {
        let mut attempt = 1;
        loop {
            match self.dispatcher.broker().insert(job.id, job.score()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < REINSERT_ATTEMPTS => {
                    warn!(worker = %self.config.name, job_id = %job.id, attempt, error = %e, "re-enqueue failed, retrying");
                    tokio::time::sleep(REINSERT_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

const REINSERT_ATTEMPTS: u32 = 3;
const REINSERT_DELAY: Duration = Duration::from_millis(100);

/// Sleep for `duration` unless shutdown is requested first. Returns `true` on shutdown.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if *shutdown.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    return true;
                }
            }
        }
    }
}

/// Handle to stop a spawned [`Worker`] and read its counters.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerHandle {
    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask the worker to stop without waiting for it.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) -> WorkerStatsSnapshot {
        self.request_shutdown();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "worker task ended abnormally");
            }
        }
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value as JsonValue;
    use taskq_core::{JobKind, JobStatus, PriorityClass};

    use super::*;
    use crate::broker::InMemoryPriorityBroker;
    use crate::executor::JobResult;
    use crate::sink::MemoryFailureSink;
    use crate::store::InMemoryJobStore;

    type TestWorker = Worker<Arc<InMemoryJobStore>, Arc<InMemoryPriorityBroker>>;

    fn kind(s: &str) -> JobKind {
        JobKind::new(s).unwrap()
    }

    fn worker(
        registry: ExecutorRegistry,
        config: WorkerConfig,
    ) -> (TestWorker, Arc<InMemoryJobStore>, Arc<InMemoryPriorityBroker>) {
        let store = InMemoryJobStore::arc();
        let broker = InMemoryPriorityBroker::arc();
        (Worker::new(store.clone(), broker.clone(), registry, config), store, broker)
    }

    async fn submit(store: &InMemoryJobStore, broker: &InMemoryPriorityBroker, kind: &str) -> JobId {
        let job = JobRecord::new(self::kind(kind), PriorityClass::High, serde_json::json!({}));
        store.put(&job).await.unwrap();
        broker.insert(job.id, job.score()).await.unwrap();
        job.id
    }

    #[tokio::test]
    async fn idle_when_nothing_queued() {
        let (worker, _, _) = worker(ExecutorRegistry::new(), WorkerConfig::default());
        let (_tx, mut rx) = watch::channel(false);
        assert_eq!(worker.run_once(&mut rx).await.unwrap(), IterationOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_persists_snapshot_then_requeues() {
        let registry = ExecutorRegistry::new()
            .with_handler(kind("flaky"), |_: &JsonValue| JobResult::failure("nope"));
        let (worker, store, broker) = worker(registry, WorkerConfig::default());
        let id = submit(&store, &broker, "flaky").await;
        let (_tx, mut rx) = watch::channel(false);

        let started = Instant::now();
        let outcome = worker.run_once(&mut rx).await.unwrap();
        assert_eq!(outcome, IterationOutcome::Retried { id, attempt: 1 });
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2), "{waited:?}");

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.last_error.as_deref(), Some("nope"));
        assert_eq!(broker.snapshot(), vec![(id, PriorityClass::High.score())]);
    }

    #[tokio::test]
    async fn fail_fast_skips_retries_for_unknown_kinds() {
        let config = WorkerConfig {
            unknown_kind: UnknownKindPolicy::FailFast,
            ..WorkerConfig::default()
        };
        let sink = Arc::new(MemoryFailureSink::new());
        let (worker, store, broker) = worker(ExecutorRegistry::new(), config);
        let worker = worker.with_failure_sink(sink.clone());
        let id = submit(&store, &broker, "zzz").await;
        let (_tx, mut rx) = watch::channel(false);

        let outcome = worker.run_once(&mut rx).await.unwrap();
        assert_eq!(outcome, IterationOutcome::FailedPermanent(id));

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::FailedPermanent);
        assert_eq!(stored.attempt_count, 1);
        assert_eq!(stored.last_error.as_deref(), Some("unknown job kind: zzz"));
        assert_eq!(sink.records().len(), 1);
        assert_eq!(broker.size().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_requeues_immediately() {
        let config = WorkerConfig {
            retry_policy: RetryPolicy::quadratic(3, Duration::from_secs(60)),
            ..WorkerConfig::default()
        };
        let registry = ExecutorRegistry::new()
            .with_handler(kind("flaky"), |_: &JsonValue| JobResult::failure("nope"));
        let (worker, store, broker) = worker(registry, config);
        let id = submit(&store, &broker, "flaky").await;

        let handle = worker.spawn();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let started = Instant::now();
        let stats = handle.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(stats.retried, 1);
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(broker.size().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_worker_drains_queue_and_stops() {
        let registry = ExecutorRegistry::new()
            .with_handler(kind("ok"), |_: &JsonValue| JobResult::Success);
        let (worker, store, broker) = worker(registry, WorkerConfig::default());
        let a = submit(&store, &broker, "ok").await;
        let b = submit(&store, &broker, "ok").await;

        let handle = worker.spawn();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let stats = handle.shutdown().await;

        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.dispatched, 2);
        for id in [a, b] {
            assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Completed);
        }
    }

    /// In-memory broker whose next `failing_inserts` inserts return a connection error.
    struct BlippingBroker {
        inner: InMemoryPriorityBroker,
        failing_inserts: AtomicU64,
    }

    impl BlippingBroker {
        fn new() -> Self {
            Self {
                inner: InMemoryPriorityBroker::new(),
                failing_inserts: AtomicU64::new(0),
            }
        }

        fn fail_next_inserts(&self, n: u64) {
            self.failing_inserts.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl PriorityBroker for BlippingBroker {
        async fn insert(&self, id: JobId, score: taskq_core::Score) -> Result<(), BrokerError> {
            let remaining = self.failing_inserts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_inserts.store(remaining - 1, Ordering::SeqCst);
                return Err(BrokerError::Connection("blip".into()));
            }
            self.inner.insert(id, score).await
        }

        async fn pop_min(&self) -> Result<Option<(JobId, taskq_core::Score)>, BrokerError> {
            self.inner.pop_min().await
        }

        async fn size(&self) -> Result<usize, BrokerError> {
            self.inner.size().await
        }
    }

    fn blipping_worker() -> (
        Worker<Arc<InMemoryJobStore>, Arc<BlippingBroker>>,
        Arc<InMemoryJobStore>,
        Arc<BlippingBroker>,
        Arc<MemoryFailureSink>,
    ) {
        let store = InMemoryJobStore::arc();
        let broker = Arc::new(BlippingBroker::new());
        let sink = Arc::new(MemoryFailureSink::new());
        let registry = ExecutorRegistry::new()
            .with_handler(kind("flaky"), |_: &JsonValue| JobResult::failure("nope"));
        let worker = Worker::new(store.clone(), broker.clone(), registry, WorkerConfig::default())
            .with_failure_sink(sink.clone());
        (worker, store, broker, sink)
    }

    async fn submit_to(store: &InMemoryJobStore, broker: &BlippingBroker) -> JobId {
        let job = JobRecord::new(kind("flaky"), PriorityClass::Low, serde_json::json!({}));
        store.put(&job).await.unwrap();
        broker.insert(job.id, job.score()).await.unwrap();
        job.id
    }

    #[tokio::test(start_paused = true)]
    async fn transient_reinsert_failure_is_retried() {
        let (worker, store, broker, sink) = blipping_worker();
        let id = submit_to(&store, &broker).await;
        broker.fail_next_inserts(1);
        let (_tx, mut rx) = watch::channel(false);

        let outcome = worker.run_once(&mut rx).await.unwrap();
        assert_eq!(outcome, IterationOutcome::Retried { id, attempt: 1 });

        assert_eq!(store.get(id).await.unwrap().unwrap().status, JobStatus::Pending);
        assert_eq!(broker.size().await.unwrap(), 1);
        assert!(sink.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_reinsert_failure_abandons_job() {
        let (worker, store, broker, sink) = blipping_worker();
        let id = submit_to(&store, &broker).await;
        broker.fail_next_inserts(REINSERT_ATTEMPTS as u64);
        let (_tx, mut rx) = watch::channel(false);

        let err = worker.run_once(&mut rx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Broker(_)), "{err:?}");

        // The broker is healthy again, but nothing is left stranded as pending.
        for _ in 0..3 {
            assert_eq!(worker.run_once(&mut rx).await.unwrap(), IterationOutcome::Idle);
        }
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::FailedPermanent);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.last_error.unwrap().starts_with("requeue failed"));
        assert_eq!(broker.size().await.unwrap(), 0);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(worker.stats().snapshot().failed_permanent, 1);
    }

    #[test]
    fn policy_parses() {
        assert_eq!("fail_fast".parse::<UnknownKindPolicy>().unwrap(), UnknownKindPolicy::FailFast);
        assert_eq!(
            "consume_retry".parse::<UnknownKindPolicy>().unwrap(),
            UnknownKindPolicy::ConsumeRetry
        );
        assert!("retry".parse::<UnknownKindPolicy>().is_err());
    }
}
