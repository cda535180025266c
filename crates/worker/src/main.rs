use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use taskq_infra::{Backends, EngineConfig, FileFailureSink, JobQueue, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskq_observability::init();

    let config = EngineConfig::from_env().context("invalid configuration")?;
    let backends = Backends::connect(&config)
        .await
        .context("failed to connect backends")?;
    if backends.is_in_memory() {
        warn!("no DATABASE_URL/REDIS_URL set; this worker only sees jobs from its own process");
    }

    let queue = JobQueue::new(backends.store.clone(), backends.broker.clone());
    let report = queue
        .requeue_stalled()
        .await
        .context("startup recovery failed")?;
    info!(
        recovered_running = report.recovered_running,
        reenqueued_pending = report.reenqueued_pending,
        "startup recovery done"
    );

    let registry = taskq_worker::demo_registry()?.with_timeout(config.execution_timeout);
    let worker = Worker::new(
        backends.store,
        backends.broker,
        registry,
        config.worker_config("worker"),
    )
    .with_failure_sink(Arc::new(FileFailureSink::new(&config.failed_jobs_log)));

    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        max_retries = config.retry_policy.bound(),
        failed_jobs_log = %config.failed_jobs_log.display(),
        "worker starting; press Ctrl+C to stop"
    );
    let handle = worker.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    let stats = handle.shutdown().await;
    info!(?stats, "worker stopped");
    Ok(())
}
