//! Asynchronous chunk invocation.
//!
//! The dispatcher only needs to hand a [`ChunkTask`] to something that will
//! eventually run it. Invokers return once the task is accepted, not once it
//! is processed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use crate::config::RetryConfig;
use crate::error::AppError;
use crate::pipeline::chunk::{ChunkSummary, ChunkTask};
use crate::pipeline::chunk_processor::ChunkProcessor;
use crate::pipeline::retry_delay;
use crate::pipeline::scheduler::ChunkScheduler;

/// Path of the worker endpoint, relative to the worker base URL.
pub const CHUNK_RUN_PATH: &str = "chunks/run";

// ─────────────────────────────────────────────────────────────────────────────
// ChunkInvoker Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Fire-and-forget delivery of one chunk to a worker.
pub trait ChunkInvoker: Send + Sync {
    /// Hands `task` to a worker. `Ok` means accepted, not completed.
    fn invoke<'a>(
        &'a self,
        task: &'a ChunkTask,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalInvoker
// ─────────────────────────────────────────────────────────────────────────────

/// Runs chunks on this process, bounded by a [`ChunkScheduler`].
#[derive(Clone)]
pub struct LocalInvoker {
    processor: ChunkProcessor,
    scheduler: ChunkScheduler,
    retry: RetryConfig,
}

impl LocalInvoker {
    pub fn new(processor: ChunkProcessor, scheduler: ChunkScheduler, retry: RetryConfig) -> Self {
        Self {
            processor,
            scheduler,
            retry,
        }
    }

    /// Runs `task` to completion, retrying storage failures with backoff.
    ///
    /// A task outside its job's chunk plan is refused without retrying.
    pub async fn run(&self, task: &ChunkTask) -> Result<ChunkSummary, AppError> {
        let permit = self.scheduler.acquire(&task.chunk_id).await;
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        #[cfg(debug_assertions)]
        tracing::debug!(
            chunk = permit.chunk_id(),
            in_flight = self.scheduler.in_flight(),
            "Chunk slot acquired"
        );

        loop {
            attempt += 1;
            match self.processor.process(task).await {
                Ok(summary) => {
                    tracing::debug!(
                        chunk = permit.chunk_id(),
                        attempt,
                        held_ms = permit.held_for().as_millis() as u64,
                        "Chunk slot released"
                    );
                    return Ok(summary);
                }
                Err(e @ AppError::InvalidRequest(_)) => return Err(e),
                Err(e) if attempt < attempts => {
                    let delay = retry_delay(&self.retry, attempt - 1);
                    warn!(
                        "[INVOKER] {}/{} attempt {}/{} failed: {}. Retrying in {:?}",
                        task.job_id, task.chunk_id, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl ChunkInvoker for LocalInvoker {
    fn invoke<'a>(
        &'a self,
        task: &'a ChunkTask,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        let invoker = self.clone();
        let task = task.clone();

        Box::pin(async move {
            tokio::spawn(async move {
                if let Err(e) = invoker.run(&task).await {
                    warn!(
                        "[INVOKER] {}/{} abandoned: {}",
                        task.job_id, task.chunk_id, e
                    );
                }
            });
            Ok(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpInvoker
// ─────────────────────────────────────────────────────────────────────────────

/// Posts chunk tasks to a remote worker's `chunks/run` endpoint.
#[derive(Clone)]
pub struct HttpInvoker {
    client: Arc<Client>,
    endpoint: Url,
}

impl HttpInvoker {
    /// `worker_url` is the worker's base URL; the endpoint path is appended.
    pub fn new(client: Arc<Client>, worker_url: &Url) -> Result<Self, AppError> {
        let mut base = worker_url.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let endpoint = base
            .join(CHUNK_RUN_PATH)
            .map_err(|e| AppError::Internal(format!("Invalid worker URL: {e}")))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl ChunkInvoker for HttpInvoker {
    fn invoke<'a>(
        &'a self,
        task: &'a ChunkTask,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.endpoint.clone())
                .json(task)
                .send()
                .await
                .map_err(|e| AppError::ConnectionFailed(format!("Chunk invocation failed: {e}")))?;

            let status = response.status();
            info!(
                "[INVOKER] POST {} ({}/{}) -> {}",
                self.endpoint.path(),
                task.job_id,
                task.chunk_id,
                status.as_u16()
            );

            if !status.is_success() {
                return Err(AppError::ConnectionFailed(format!(
                    "Worker rejected chunk {} with status {}",
                    task.chunk_id,
                    status.as_u16()
                )));
            }

            Ok(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{classifier, seed_job};
    use crate::storage::jobs;
    use crate::storage::{MemoryObjectStore, ObjectStore};
    use crate::streaming::RowRange;
    use crate::validation::Policy;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task() -> ChunkTask {
        ChunkTask::new("job-9", 2, RowRange::new(2000, 3000))
    }

    fn http_invoker(base: &str) -> HttpInvoker {
        let client = Arc::new(Client::new());
        HttpInvoker::new(client, &Url::parse(base).unwrap()).unwrap()
    }

    fn no_wait_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        }
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let invoker = http_invoker("http://worker:9000/ingest");
        assert_eq!(invoker.endpoint().as_str(), "http://worker:9000/ingest/chunks/run");

        let invoker = http_invoker("http://worker:9000/");
        assert_eq!(invoker.endpoint().as_str(), "http://worker:9000/chunks/run");
    }

    #[tokio::test]
    async fn test_http_invoke_posts_task_payload() {
        let mock_server = MockServer::start().await;
        let expected = serde_json::json!({
            "job_id": "job-9",
            "chunk_id": "chunk-00002",
            "row_range": { "start": 2000, "end": 3000 }
        });

        Mock::given(method("POST"))
            .and(path("/chunks/run"))
            .and(body_json(&expected))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = http_invoker(&mock_server.uri()).invoke(&task()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_http_invoke_maps_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chunks/run"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = http_invoker(&mock_server.uri()).invoke(&task()).await;
        match result {
            Err(AppError::ConnectionFailed(msg)) => assert!(msg.contains("503")),
            other => panic!("Expected ConnectionFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_run_processes_chunk() {
        let store = Arc::new(MemoryObjectStore::new());
        seed_job(&store, "job-1", "asin,title\nB1,A\nB2,B\n", Policy::default(), &[], 2).await;

        let processor = ChunkProcessor::new(store.clone(), classifier());
        let scheduler = ChunkScheduler::new(1);
        let invoker = LocalInvoker::new(processor, scheduler.clone(), no_wait_retry(2));

        let task = ChunkTask::new("job-1", 0, RowRange::new(0, 2));
        let summary = invoker.run(&task).await.unwrap();
        assert_eq!(summary.valid_count, 2);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_local_run_refuses_unplanned_chunk_without_retry() {
        let store = Arc::new(MemoryObjectStore::new());
        seed_job(&store, "job-1", "asin,title\nB1,A\nB2,B\n", Policy::default(), &[], 2).await;

        let processor = ChunkProcessor::new(store.clone(), classifier());
        // Retries would take seconds; a refused task must return at once
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 2_000,
        };
        let invoker = LocalInvoker::new(processor, ChunkScheduler::new(1), retry);

        let task = ChunkTask::new("job-1", 7, RowRange::new(0, 2));
        let result = tokio::time::timeout(Duration::from_millis(500), invoker.run(&task))
            .await
            .expect("refusal should not be retried");
        assert!(matches!(result, Err(AppError::InvalidRequest(_))));

        let page = store
            .list_page(&jobs::results_prefix("job-1"), None, 10)
            .await
            .unwrap();
        assert!(page.keys.is_empty());
    }

    #[tokio::test]
    async fn test_local_run_gives_up_after_max_attempts() {
        let store = Arc::new(MemoryObjectStore::new());
        let processor = ChunkProcessor::new(store, classifier());
        let invoker = LocalInvoker::new(processor, ChunkScheduler::new(1), no_wait_retry(3));

        let result = invoker.run(&task()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_local_invoke_returns_before_processing() {
        let store = Arc::new(MemoryObjectStore::new());
        seed_job(&store, "job-1", "asin,title\nB1,A\n", Policy::default(), &[], 1).await;

        let processor = ChunkProcessor::new(store.clone(), classifier());
        let invoker = LocalInvoker::new(processor, ChunkScheduler::new(1), no_wait_retry(1));

        let task = ChunkTask::new("job-1", 0, RowRange::new(0, 1));
        invoker.invoke(&task).await.unwrap();

        let key = jobs::result_key("job-1", &task.chunk_id);
        let mut stored = None;
        for _ in 0..100 {
            stored = store.get(&key).await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stored.is_some(), "spawned chunk should eventually store its result");
    }
}
