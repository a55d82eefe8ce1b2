//! Chunked product-catalog validation with manifest-based job progress.
//!
//! Uploads are split into fixed-size chunks, each chunk is classified
//! independently and stored as one result, and job status is derived by
//! counting stored results against the manifest.

pub mod commands;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod storage;
pub mod streaming;
pub mod validation;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use crate::config::Config;
pub use crate::error::AppError;
use crate::state::AppState;

/// Runs the HTTP service until `shutdown` is cancelled.
pub async fn serve(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let state = Arc::new(AppState::build(&config).await?);
    let router = commands::build_router(state, &config);

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(
        "[API] Listening on {} (storage={:?}, dispatch={:?}, chunk_size={})",
        listener.local_addr()?,
        config.storage.backend,
        config.dispatch.mode,
        config.processing.chunk_size
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("[API] Server stopped");
    Ok(())
}
