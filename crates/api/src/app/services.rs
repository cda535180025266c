use std::sync::Arc;

use taskq_core::JobKind;
use taskq_infra::{
    BackendError, Backends, EngineConfig, ExecutorRegistry, JobQueue, JobStore, PriorityBroker,
    Worker, WorkerConfig, WorkerHandle,
};

/// Queue over whichever store and broker were configured.
pub type SharedQueue = JobQueue<Arc<dyn JobStore>, Arc<dyn PriorityBroker>>;

#[derive(Clone)]
pub struct AppServices {
    queue: SharedQueue,
    backends: Backends,
    allowed_kinds: Arc<Vec<JobKind>>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("backends", &self.backends)
            .field("allowed_kinds", &self.allowed_kinds)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    pub fn new(backends: Backends, allowed_kinds: Vec<JobKind>) -> Self {
        Self {
            queue: JobQueue::new(backends.store.clone(), backends.broker.clone()),
            backends,
            allowed_kinds: Arc::new(allowed_kinds),
        }
    }

    /// In-memory services (dev/test).
    pub fn in_memory(allowed_kinds: Vec<JobKind>) -> Self {
        Self::new(Backends::in_memory(), allowed_kinds)
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn allowed_kinds(&self) -> &[JobKind] {
        &self.allowed_kinds
    }

    pub fn is_allowed(&self, kind: &JobKind) -> bool {
        self.allowed_kinds.contains(kind)
    }
}

pub async fn build_services(config: &EngineConfig) -> Result<AppServices, BackendError> {
    let backends = Backends::connect(config).await?;
    if backends.is_in_memory() {
        tracing::warn!("DATABASE_URL/REDIS_URL not set; jobs live in this process only");
    }
    Ok(AppServices::new(backends, config.allowed_kinds.clone()))
}

/// Run a worker in this process over the same store and broker as the API.
///
/// Returns `None` unless both backends are in-memory; with shared backends the
/// separate worker binary does the work.
pub fn spawn_embedded_worker(
    services: &AppServices,
    registry: ExecutorRegistry,
    config: WorkerConfig,
) -> Option<WorkerHandle> {
    if !services.backends.is_in_memory() {
        return None;
    }
    let worker = Worker::new(
        services.backends.store.clone(),
        services.backends.broker.clone(),
        registry,
        config,
    );
    Some(worker.spawn())
}
