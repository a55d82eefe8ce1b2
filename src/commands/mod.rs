//! HTTP handlers.
//!
//! Handlers are thin: they extract the request, call into the pipeline and
//! map `AppError` to a response through its `IntoResponse` impl.

pub mod catalog;
pub mod jobs;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::AppState;

/// Builds the service router.
///
/// Request bodies are capped at `processing.max_input_bytes` so uploads
/// larger than a job may hold are refused before they are buffered.
pub fn build_router(state: Arc<AppState>, config: &Config) -> Router {
    let router = Router::new()
        .merge(jobs::routes())
        .merge(catalog::routes())
        .layer(DefaultBodyLimit::max(config.processing.max_input_bytes))
        .layer(TraceLayer::new_for_http());

    let router = if config.server.cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tempfile::TempDir;
    use tokio::net::TcpListener;

    use crate::config::{Config, StorageBackend};
    use crate::state::AppState;

    /// A running server bound to an ephemeral port.
    pub struct TestApp {
        pub base_url: String,
        pub state: Arc<AppState>,
        pub client: reqwest::Client,
        pub dir: TempDir,
    }

    pub async fn spawn_app(configure: impl FnOnce(&mut Config)) -> TestApp {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        config.processing.output_dir = dir.path().join("out");
        config.processing.chunk_size = 2;
        config.dispatch.retry.initial_backoff_ms = 1;
        config.dispatch.retry.max_backoff_ms = 2;
        configure(&mut config);

        let state = Arc::new(AppState::build(&config).await.unwrap());
        let router = super::build_router(state.clone(), &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        TestApp {
            base_url: format!("http://{addr}"),
            state,
            client: reqwest::Client::new(),
            dir,
        }
    }

    impl TestApp {
        pub fn url(&self, path: &str) -> String {
            format!("{}{}", self.base_url, path)
        }
    }
}
