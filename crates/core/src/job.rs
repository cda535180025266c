//! Job record and its lifecycle state machine.
//!
//! ```text
//! pending --dispatch--> running --success--> completed
//!                          |
//!                          +--failure, retries left--> pending
//!                          +--failure, bound reached--> failed_permanent
//! ```
//!
//! Every mutator checks the current status and returns
//! [`DomainError::InvalidTransition`] instead of silently overwriting state.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;
use crate::priority::{PriorityClass, Score};

/// Declared kind of a job, used to route it to an executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKind(String);

impl JobKind {
    /// Create a kind after checking it is a non-empty token without whitespace.
    pub fn new(kind: impl Into<String>) -> DomainResult<Self> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(DomainError::validation("job kind must not be empty"));
        }
        if kind.chars().any(char::is_whitespace) {
            return Err(DomainError::validation(format!(
                "job kind must not contain whitespace: {kind:?}"
            )));
        }
        Ok(Self(kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for JobKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the broker to be dispatched.
    Pending,
    /// Claimed by a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Exhausted its retries (or was abandoned).
    FailedPermanent,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::FailedPermanent,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::FailedPermanent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::FailedPermanent => "failed_permanent",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job status: {s:?}")))
    }
}

/// A persisted unit of work and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub priority_class: PriorityClass,
    /// Opaque to the engine; handed to the executor as-is.
    pub payload: serde_json::Value,
    pub status: JobStatus,
    /// Number of failed execution attempts so far.
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    /// Set each time the job is dispatched.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time, or the time of the most recent failure.
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobRecord {
    /// Create a new pending job with a fresh id.
    pub fn new(kind: JobKind, priority_class: PriorityClass, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            kind,
            priority_class,
            payload,
            status: JobStatus::Pending,
            attempt_count: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    /// Broker score for this job. Stable across retries.
    pub fn score(&self) -> Score {
        self.priority_class.score()
    }

    fn expect_status(&self, expected: JobStatus, to: JobStatus) -> DomainResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to,
            })
        }
    }

    /// pending → running.
    pub fn mark_running(&mut self) -> DomainResult<()> {
        self.expect_status(JobStatus::Pending, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running → completed.
    pub fn mark_completed(&mut self) -> DomainResult<()> {
        self.expect_status(JobStatus::Running, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Record a failed attempt while the job is still running.
    ///
    /// This is the failure snapshot persisted before the retry decision; the
    /// status stays `running` until [`JobRecord::mark_requeued`] or
    /// [`JobRecord::mark_failed_permanent`].
    pub fn record_failure(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.expect_status(JobStatus::Running, JobStatus::Running)?;
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// running → pending, for a retry or for recovering a job whose worker died.
    pub fn mark_requeued(&mut self) -> DomainResult<()> {
        self.expect_status(JobStatus::Running, JobStatus::Pending)?;
        self.status = JobStatus::Pending;
        Ok(())
    }

    /// running → failed_permanent.
    pub fn mark_failed_permanent(&mut self) -> DomainResult<()> {
        self.expect_status(JobStatus::Running, JobStatus::FailedPermanent)?;
        self.status = JobStatus::FailedPermanent;
        Ok(())
    }

    /// pending → failed_permanent, for a job that never made it into the broker.
    ///
    /// Does not count as an execution attempt.
    pub fn abandon(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.expect_status(JobStatus::Pending, JobStatus::FailedPermanent)?;
        self.status = JobStatus::FailedPermanent;
        self.last_error = Some(error.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}
