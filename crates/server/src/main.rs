mod config;
mod error;
mod routes;
mod templates;
mod upload;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gallery_core::{Bucket, ListOptions, Registry};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut registry = Registry::default();
    gallery_gcs::register(&mut registry);

    let bucket = registry
        .open(&config.bucket_url)
        .await
        .with_context(|| format!("failed to open bucket {}", config.bucket_url))?;

    let objects = count_objects(&bucket)
        .await
        .context("failed to list bucket")?;
    info!(scheme = bucket.scheme(), objects, "bucket ready");

    let state = Arc::new(AppState {
        bucket,
        max_upload_bytes: config.max_upload_bytes,
    });
    let app = routes::router(state);

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, max_upload_bytes = config.max_upload_bytes, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down");
    Ok(())
}

/// Walk the listing one object at a time without holding it in memory.
async fn count_objects(bucket: &Bucket) -> gallery_core::Result<usize> {
    let mut lister = bucket.list(ListOptions::new());
    let mut count = 0;
    while lister.next().await?.is_some() {
        count += 1;
    }
    Ok(count)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down");
}
