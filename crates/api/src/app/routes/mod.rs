use axum::{
    routing::{get, post},
    Router,
};

pub mod jobs;
pub mod system;

/// Router for the job endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/submit-job", post(jobs::submit_job))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/status/:id", get(jobs::get_job_status))
        .route("/queue/stats", get(jobs::queue_stats))
}
