//! Application state shared by the HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::info;
use url::Url;

use crate::config::{Config, DispatchMode, StorageBackend};
use crate::error::AppError;
use crate::pipeline::{
    BatchProcessor, ChunkInvoker, ChunkProcessor, ChunkScheduler, Dispatcher, HttpInvoker,
    LocalInvoker, Reconciler, RowClassifier,
};
use crate::storage::jobs;
use crate::storage::{Database, MemoryObjectStore, ObjectStore};
use crate::validation::Taxonomy;

// ─────────────────────────────────────────────────────────────────────────────
// Application State
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a request handler needs, built once at startup.
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    /// Set when the store is SQLite, for health checks.
    pub database: Option<Database>,
    /// Current taxonomy. Jobs and batch runs take a snapshot; nothing reads
    /// it while classifying.
    taxonomy: RwLock<Arc<Taxonomy>>,
    pub dispatcher: Dispatcher,
    pub reconciler: Reconciler,
    /// Runs chunks posted to the worker endpoint.
    pub worker: LocalInvoker,
    pub batch: BatchProcessor,
}

impl AppState {
    /// Opens the configured store, reloads the persisted taxonomy and wires
    /// the pipeline.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let (store, database): (Arc<dyn ObjectStore>, Option<Database>) =
            match config.storage.backend {
                StorageBackend::Sqlite => {
                    let db = Database::init(config.storage.sqlite_path.clone()).await?;
                    (Arc::new(db.clone()), Some(db))
                }
                StorageBackend::Memory => (Arc::new(MemoryObjectStore::new()), None),
            };

        let taxonomy = jobs::load_taxonomy(store.as_ref())
            .await?
            .unwrap_or_default();
        info!("[STATE] Loaded taxonomy with {} labels", taxonomy.len());

        let processing = &config.processing;
        let classifier = Arc::new(RowClassifier::with_default_enrichers(
            processing.classify_threads,
            processing.enrich,
        )?);

        let worker = LocalInvoker::new(
            ChunkProcessor::new(store.clone(), classifier.clone()),
            ChunkScheduler::new(processing.max_concurrent_chunks),
            config.dispatch.retry.clone(),
        );

        let invoker: Arc<dyn ChunkInvoker> = match config.dispatch.mode {
            DispatchMode::Local => Arc::new(worker.clone()),
            DispatchMode::Http => {
                let worker_url = config
                    .dispatch
                    .worker_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("worker_url is required for http dispatch"))?;
                let client = Client::builder()
                    .timeout(Duration::from_secs(config.dispatch.request_timeout_secs))
                    .build()?;
                let invoker = HttpInvoker::new(Arc::new(client), &Url::parse(worker_url)?)?;
                info!("[STATE] Dispatching chunks to {}", invoker.endpoint());
                Arc::new(invoker)
            }
        };

        let dispatcher = Dispatcher::new(
            store.clone(),
            invoker,
            processing.chunk_size,
            processing.max_input_bytes,
            config.dispatch.concurrency,
            config.dispatch.retry.clone(),
        );
        let reconciler = Reconciler::new(store.clone(), processing.list_page_size);
        let batch = BatchProcessor::new(
            processing.output_dir.clone(),
            classifier,
            processing.max_input_bytes,
        );

        Ok(Self {
            store,
            database,
            taxonomy: RwLock::new(Arc::new(taxonomy)),
            dispatcher,
            reconciler,
            worker,
            batch,
        })
    }

    /// The taxonomy as of now. Later replacements do not affect it.
    pub async fn taxonomy_snapshot(&self) -> Arc<Taxonomy> {
        self.taxonomy.read().await.clone()
    }

    /// Replaces the taxonomy wholesale and persists it. Returns the number of
    /// distinct labels.
    ///
    /// The write lock is held across the store write so concurrent
    /// replacements persist in the order they are applied.
    pub async fn replace_taxonomy(&self, labels: &[String]) -> Result<usize, AppError> {
        let taxonomy = Taxonomy::new(labels);
        let mut current = self.taxonomy.write().await;

        jobs::save_taxonomy(self.store.as_ref(), &taxonomy).await?;
        let count = taxonomy.len();
        *current = Arc::new(taxonomy);

        info!("[STATE] Taxonomy replaced with {} labels", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sqlite_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.sqlite_path = dir.path().join("catalog.db");
        config.processing.output_dir = dir.path().join("out");
        config
    }

    #[tokio::test]
    async fn test_snapshot_is_unaffected_by_replacement() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Memory;
        let state = AppState::build(&config).await.unwrap();

        state
            .replace_taxonomy(&["Books".to_string(), " books ".to_string(), "Toys".to_string()])
            .await
            .unwrap();
        let before = state.taxonomy_snapshot().await;

        let count = state.replace_taxonomy(&["Garden".to_string()]).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(before.len(), 2);
        assert!(before.contains("toys"));
        assert!(!state.taxonomy_snapshot().await.contains("toys"));
    }

    #[tokio::test]
    async fn test_taxonomy_survives_restart() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = sqlite_config(&dir);

        {
            let state = AppState::build(&config).await.unwrap();
            assert!(state.database.is_some());
            state
                .replace_taxonomy(&["Electronics".to_string(), "Books".to_string()])
                .await
                .unwrap();
        }

        let reopened = AppState::build(&config).await.unwrap();
        let taxonomy = reopened.taxonomy_snapshot().await;
        assert_eq!(taxonomy.labels().collect::<Vec<_>>(), vec!["Books", "Electronics"]);
    }

    #[tokio::test]
    async fn test_http_mode_requires_worker_url() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = sqlite_config(&dir);
        config.dispatch.mode = DispatchMode::Http;

        assert!(AppState::build(&config).await.is_err());
    }
}
