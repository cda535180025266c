use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskq_observability::init();

    let config = taskq_infra::EngineConfig::from_env().context("invalid configuration")?;
    let app = taskq_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    if let Some(worker) = app.worker {
        let stats = worker.shutdown().await;
        tracing::info!(?stats, "embedded worker stopped");
    }
    Ok(())
}
