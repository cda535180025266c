use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use taskq_core::JobRecord;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST /submit-job`. Fields are optional so that a missing one can be
/// reported by name.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_type: Option<String>,
    pub priority: Option<String>,
    pub payload: Option<JsonValue>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub message: &'static str,
    pub job_id: String,
    pub status: &'static str,
    pub priority: &'static str,
    pub job_type: String,
}

/// Full view of one job, as returned by `GET /jobs/status/{id}`.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub job_type: String,
    pub priority: &'static str,
    pub status: &'static str,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub payload: JsonValue,
}

impl From<JobRecord> for JobStatusResponse {
    fn from(job: JobRecord) -> Self {
        Self {
            job_id: job.id.to_string(),
            job_type: job.kind.to_string(),
            priority: job.priority_class.as_str(),
            status: job.status.as_str(),
            attempt_count: job.attempt_count,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            last_error: job.last_error,
            payload: job.payload,
        }
    }
}

/// Row of `GET /jobs`; the payload is left out.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub job_type: String,
    pub priority: &'static str,
    pub status: &'static str,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobSummary {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.id.to_string(),
            job_type: job.kind.to_string(),
            priority: job.priority_class.as_str(),
            status: job.status.as_str(),
            attempt_count: job.attempt_count,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSummary>,
    pub total_jobs: usize,
}
