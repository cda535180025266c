use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use taskq_infra::{QueueError, StoreError, SubmitError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    tracing::error!(error = %err, "store request failed");
    match err {
        StoreError::Storage(msg) => json_error(StatusCode::SERVICE_UNAVAILABLE, "store_error", msg),
        StoreError::Corrupt { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "corrupt_record", err.to_string())
        }
    }
}

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::Store(e) => store_error_to_response(e),
        QueueError::Broker(e) => {
            tracing::error!(error = %e, "broker request failed");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "broker_error", e.to_string())
        }
    }
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Invalid(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        SubmitError::Store(e) => store_error_to_response(e),
        SubmitError::Enqueue { .. } => {
            tracing::error!(error = %err, "job could not be enqueued");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "enqueue_failed", err.to_string())
        }
    }
}
