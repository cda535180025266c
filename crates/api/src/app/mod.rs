//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection, the job queue and the embedded worker
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use taskq_infra::{EngineConfig, WorkerHandle};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Router plus the worker running inside this process, if any.
#[derive(Debug)]
pub struct App {
    pub router: Router,
    pub worker: Option<WorkerHandle>,
}

/// Build the full HTTP router over already-built services.
pub fn router(services: Arc<services::AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Build the app (public entrypoint used by `main.rs`).
///
/// With in-memory backends nothing outside this process can see the queue, so a
/// worker with the demo handlers is started alongside the router.
pub async fn build_app(config: &EngineConfig) -> anyhow::Result<App> {
    let services = Arc::new(services::build_services(config).await?);

    let worker = if services.backends().is_in_memory() {
        let registry = taskq_worker::demo_registry()?.with_timeout(config.execution_timeout);
        services::spawn_embedded_worker(&services, registry, config.worker_config("embedded-worker"))
    } else {
        None
    };

    Ok(App {
        router: router(services),
        worker,
    })
}
