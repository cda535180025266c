use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use taskq_core::{JobId, JobKind, PriorityClass};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

fn missing_field(name: &str) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "missing_field", format!("Missing field: {name}"))
}

pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::SubmitJobRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text());
        }
    };

    let Some(job_type) = body.job_type else {
        return missing_field("job_type");
    };
    let Some(priority) = body.priority else {
        return missing_field("priority");
    };
    let Some(payload) = body.payload else {
        return missing_field("payload");
    };

    let priority = match priority.parse::<PriorityClass>() {
        Ok(p) => p,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_priority",
                "priority must be one of: high, low",
            );
        }
    };

    let kind = match JobKind::new(job_type) {
        Ok(kind) if services.is_allowed(&kind) => kind,
        _ => {
            let valid: Vec<_> = services.allowed_kinds().iter().map(JobKind::as_str).collect();
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_job_type",
                format!("job_type must be one of: {}", valid.join(", ")),
            );
        }
    };

    let job_type = kind.to_string();
    match services.queue().submit(kind, priority, payload).await {
        Ok(id) => (
            StatusCode::CREATED,
            Json(dto::SubmitJobResponse {
                message: "Job submitted successfully",
                job_id: id.to_string(),
                status: "pending",
                priority: priority.as_str(),
                job_type,
            }),
        )
            .into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

pub async fn get_job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Ok(id) = id.parse::<JobId>() else {
        return errors::json_error(StatusCode::BAD_REQUEST, "invalid_job_id", "job id must be a UUID");
    };

    match services.queue().get_status(id).await {
        Ok(Some(job)) => Json(dto::JobStatusResponse::from(job)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "Job not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_jobs(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.queue().list().await {
        Ok(jobs) => {
            let jobs: Vec<_> = jobs.iter().map(dto::JobSummary::from).collect();
            Json(dto::JobListResponse {
                total_jobs: jobs.len(),
                jobs,
            })
            .into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn queue_stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.queue().stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}
