use anyhow::{Context, Result};
use rollcall_core::ToleranceMatcher;
use rollcall_io::{HttpFetcher, RetryPolicy, ScratchSpace, WebhookNotifier};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod pipeline;
mod roster;
mod server;
#[cfg(test)]
mod testing;

use config::Config;
use pipeline::Pipeline;
use server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load()?;
    tracing::info!(
        metric = %config.metric,
        tolerance = config.tolerance,
        concurrency = config.fetch_concurrency,
        scratch = %config.scratch_dir.display(),
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config.model_dir, config.engine_queue_depth)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;
    let fetcher = HttpFetcher::new(config.fetch_timeout()).context("building image fetcher")?;
    let notifier = WebhookNotifier::new(
        config.webhook_url.clone(),
        config.webhook_timeout(),
        RetryPolicy {
            retries: config.webhook_retries,
            backoff: config.webhook_backoff(),
        },
    )
    .context("building webhook client")?;

    let pipeline = Pipeline::new(
        Arc::new(fetcher),
        Arc::new(engine),
        ToleranceMatcher::new(config.metric, config.tolerance),
        ScratchSpace::new(config.scratch_dir.clone()),
        config.fetch_concurrency,
    );
    let state = AppState::new(pipeline, Arc::new(notifier));
    let deliveries = state.deliveries.clone();
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "rollcalld ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    server::drain_deliveries(&deliveries, config.shutdown_grace()).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
