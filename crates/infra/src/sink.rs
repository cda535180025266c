//! Permanent-failure notifications.
//!
//! When a job reaches `failed_permanent` the worker hands the final record to a
//! [`FailureSink`]. Sink errors are logged by the caller and never affect the job's
//! stored state.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use taskq_core::JobRecord;

#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn record(&self, job: &JobRecord) -> std::io::Result<()>;
}

#[async_trait]
impl<T: FailureSink + ?Sized> FailureSink for Arc<T> {
    async fn record(&self, job: &JobRecord) -> std::io::Result<()> {
        (**self).record(job).await
    }
}

fn last_error(job: &JobRecord) -> &str {
    job.last_error.as_deref().unwrap_or("unknown error")
}

/// Emits a `warn` event per permanently failed job.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureSink;

#[async_trait]
impl FailureSink for TracingFailureSink {
    async fn record(&self, job: &JobRecord) -> std::io::Result<()> {
        warn!(
            job_id = %job.id,
            kind = %job.kind,
            attempts = job.attempt_count,
            error = %last_error(job),
            "job permanently failed"
        );
        Ok(())
    }
}

/// Appends `"<job id>: <last error>"` lines to a file, then logs like
/// [`TracingFailureSink`].
#[derive(Debug, Clone)]
pub struct FileFailureSink {
    path: PathBuf,
}

impl FileFailureSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl FailureSink for FileFailureSink {
    async fn record(&self, job: &JobRecord) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = format!("{}: {}\n", job.id, last_error(job).replace('\n', " "));
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        TracingFailureSink.record(job).await
    }
}

/// Keeps every reported record in memory. Intended for tests.
#[derive(Debug, Default)]
pub struct MemoryFailureSink {
    records: Mutex<Vec<JobRecord>>,
}

impl MemoryFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<JobRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FailureSink for MemoryFailureSink {
    async fn record(&self, job: &JobRecord) -> std::io::Result<()> {
        self.records
            .lock()
            .map_err(|_| std::io::Error::other("memory sink lock poisoned"))?
            .push(job.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskq_core::{JobKind, PriorityClass};

    fn failed_job(error: &str) -> JobRecord {
        let mut job = JobRecord::new(
            JobKind::new("send_email").unwrap(),
            PriorityClass::High,
            serde_json::json!({}),
        );
        job.mark_running().unwrap();
        job.record_failure(error).unwrap();
        job.mark_failed_permanent().unwrap();
        job
    }

    #[tokio::test]
    async fn file_sink_appends_one_line_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed_jobs.log");
        let sink = FileFailureSink::new(&path);

        let a = failed_job("smtp down");
        let b = failed_job("multi\nline");
        sink.record(&a).await.unwrap();
        sink.record(&b).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines, vec![format!("{}: smtp down", a.id), format!("{}: multi line", b.id)]);
    }

    #[tokio::test]
    async fn memory_sink_keeps_records() {
        let sink = MemoryFailureSink::new();
        let job = failed_job("boom");
        sink.record(&job).await.unwrap();
        assert_eq!(sink.records(), vec![job]);
    }
}
