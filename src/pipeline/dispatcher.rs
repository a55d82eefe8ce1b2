//! Job creation and chunk fan-out.
//!
//! Order of durable writes for a new job:
//!
//! 1. input (`jobs/{id}/input/source.csv`)
//! 2. context (`jobs/{id}/context`)
//! 3. manifest (`jobs/{id}/manifest`), created exactly once
//!
//! Chunk invocations start only after the manifest exists, so a reconciler
//! never sees a result for a job whose chunk count is unknown.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::error::AppError;
use crate::pipeline::chunk::ChunkTask;
use crate::pipeline::invoker::ChunkInvoker;
use crate::pipeline::retry_delay;
use crate::storage::jobs::{self, DispatchFailure, JobContext, Manifest};
use crate::storage::ObjectStore;
use crate::streaming::plan_chunks;
use crate::validation::{inspect, InputProfile, Policy, Taxonomy};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of fanning out one job's chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: u64,
    /// Chunk ids that could not be dispatched after all retries.
    pub failed: Vec<String>,
}

/// A job whose manifest is committed. Chunk dispatch may still be running.
#[derive(Debug)]
pub struct CreatedJob {
    pub job_id: String,
    pub total_rows: u64,
    pub total_chunks: u64,
    /// Background dispatch. The HTTP layer detaches it; tests await it.
    pub dispatch: JoinHandle<DispatchReport>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn ChunkInvoker>,
    chunk_size: u64,
    max_input_bytes: usize,
    concurrency: usize,
    retry: RetryConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        invoker: Arc<dyn ChunkInvoker>,
        chunk_size: u64,
        max_input_bytes: usize,
        concurrency: usize,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            invoker,
            chunk_size: chunk_size.max(1),
            max_input_bytes,
            concurrency: concurrency.max(1),
            retry,
        }
    }

    /// Validates `input`, commits the job and starts dispatching its chunks.
    ///
    /// Returns as soon as the manifest is written. The taxonomy snapshot and
    /// policy are stored with the job so every chunk sees the same inputs.
    ///
    /// # Errors
    ///
    /// - `AppError::InputUnreadable` if preflight fails (nothing is written)
    /// - `AppError::Storage` if the input or context cannot be stored
    /// - `AppError::ManifestWriteFailed` if the manifest cannot be created
    ///
    /// On a storage or manifest failure the objects already written for the
    /// job are removed again.
    pub async fn create_job(
        &self,
        input: Vec<u8>,
        policy: Policy,
        taxonomy: Arc<Taxonomy>,
    ) -> Result<CreatedJob, AppError> {
        let max_input_bytes = self.max_input_bytes;
        let (input, profile): (Vec<u8>, InputProfile) = tokio::task::spawn_blocking(move || {
            let profile = inspect(&input, max_input_bytes)?;
            Ok::<_, AppError>((input, profile))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Preflight task failed: {e}")))??;

        for warning in &profile.warnings {
            warn!("[DISPATCHER] Input warning: {:?}", warning);
        }

        let job_id = Uuid::new_v4().to_string();
        let ranges = plan_chunks(profile.total_rows, self.chunk_size);
        let total_chunks = ranges.len() as u64;
        let store = self.store.as_ref();

        store.put(&jobs::input_key(&job_id), input).await?;

        let context = JobContext {
            policy,
            taxonomy: taxonomy.as_ref().clone(),
        };
        if let Err(e) = jobs::write_context(store, &job_id, &context).await {
            discard_uncommitted(store, &job_id).await;
            return Err(e);
        }

        let manifest = Manifest {
            job_id: job_id.clone(),
            chunks_created: total_chunks,
            total_rows: profile.total_rows,
            chunk_size: self.chunk_size,
            created_at: jobs::current_timestamp(),
        };
        if let Err(e) = jobs::write_manifest(store, &manifest).await {
            discard_uncommitted(store, &job_id).await;
            return Err(e);
        }

        info!(
            "[DISPATCHER] Job {} created: {} rows in {} chunks (auto_fix={}, strict_mode={})",
            job_id, profile.total_rows, total_chunks, policy.auto_fix, policy.strict_mode
        );

        let tasks: Vec<ChunkTask> = ranges
            .into_iter()
            .enumerate()
            .map(|(ordinal, range)| ChunkTask::new(job_id.clone(), ordinal as u64, range))
            .collect();

        let dispatch = tokio::spawn(dispatch_all(
            self.store.clone(),
            self.invoker.clone(),
            job_id.clone(),
            tasks,
            self.concurrency,
            self.retry.clone(),
        ));

        Ok(CreatedJob {
            job_id,
            total_rows: profile.total_rows,
            total_chunks,
            dispatch,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Removes the input and context of a job whose manifest was never written.
/// Cleanup failures are logged; the caller reports the original error.
async fn discard_uncommitted(store: &dyn ObjectStore, job_id: &str) {
    for key in [jobs::input_key(job_id), jobs::context_key(job_id)] {
        if let Err(e) = store.delete(&key).await {
            warn!("[DISPATCHER] Failed to remove {} after aborted job: {}", key, e);
        }
    }
}

async fn dispatch_all(
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn ChunkInvoker>,
    job_id: String,
    tasks: Vec<ChunkTask>,
    concurrency: usize,
    retry: RetryConfig,
) -> DispatchReport {
    let outcomes: Vec<(ChunkTask, Result<(), (u32, AppError)>)> = stream::iter(tasks)
        .map(|task| {
            let invoker = invoker.clone();
            let retry = retry.clone();
            async move {
                let outcome = dispatch_with_retry(invoker.as_ref(), &task, &retry).await;
                (task, outcome)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let mut report = DispatchReport::default();
    for (task, outcome) in outcomes {
        let (attempts, last_error) = match outcome {
            Ok(()) => {
                report.dispatched += 1;
                continue;
            }
            Err(failure) => failure,
        };

        let failed = AppError::ChunkDispatchFailed {
            chunk_id: task.chunk_id.clone(),
            message: last_error.to_string(),
        };
        error!("[DISPATCHER] Job {}: {}", job_id, failed);

        let record = DispatchFailure {
            job_id: job_id.clone(),
            chunk_id: task.chunk_id.clone(),
            attempts,
            message: last_error.to_string(),
        };
        if let Err(e) = jobs::record_dispatch_failure(store.as_ref(), &record).await {
            error!(
                "[DISPATCHER] Failed to record dispatch failure for {}/{}: {}",
                job_id, task.chunk_id, e
            );
        }
        report.failed.push(task.chunk_id);
    }
    report.failed.sort();

    info!(
        "[DISPATCHER] Job {} dispatch finished: {} dispatched, {} failed",
        job_id,
        report.dispatched,
        report.failed.len()
    );

    report
}

/// Invokes `task`, retrying with backoff. On failure returns the number of
/// attempts made and the last error.
async fn dispatch_with_retry(
    invoker: &dyn ChunkInvoker,
    task: &ChunkTask,
    retry: &RetryConfig,
) -> Result<(), (u32, AppError)> {
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match invoker.invoke(task).await {
            Ok(()) => {
                #[cfg(debug_assertions)]
                tracing::debug!(chunk = %task.chunk_id, attempt, "Chunk dispatched");
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                let delay = retry_delay(retry, attempt - 1);
                warn!(
                    "[DISPATCHER] {}/{} dispatch attempt {}/{} failed: {}",
                    task.job_id, task.chunk_id, attempt, attempts, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err((attempt, e)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ListPage, MemoryObjectStore};
    use crate::streaming::RowRange;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Records tasks and whether the manifest existed when each arrived.
    struct RecordingInvoker {
        store: Arc<dyn ObjectStore>,
        seen: Mutex<Vec<(ChunkTask, bool)>>,
        /// Invocations to reject before accepting.
        failures_before_success: AtomicU32,
    }

    impl RecordingInvoker {
        fn new(store: Arc<dyn ObjectStore>, failures_before_success: u32) -> Self {
            Self {
                store,
                seen: Mutex::new(Vec::new()),
                failures_before_success: AtomicU32::new(failures_before_success),
            }
        }

        fn seen(&self) -> Vec<(ChunkTask, bool)> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl ChunkInvoker for RecordingInvoker {
        fn invoke<'a>(
            &'a self,
            task: &'a ChunkTask,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async move {
                let manifest = jobs::read_manifest(self.store.as_ref(), &task.job_id)
                    .await
                    .unwrap();
                self.seen
                    .lock()
                    .unwrap()
                    .push((task.clone(), manifest.is_some()));

                let remaining = self.failures_before_success.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.failures_before_success.store(remaining - 1, Ordering::SeqCst);
                    return Err(AppError::ConnectionFailed("worker unavailable".into()));
                }
                Ok(())
            })
        }
    }

    /// Store whose `create` always fails.
    struct NoCreateStore(MemoryObjectStore);

    impl ObjectStore for NoCreateStore {
        fn put<'a>(
            &'a self,
            key: &'a str,
            body: Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            self.0.put(key, body)
        }

        fn create<'a>(
            &'a self,
            _key: &'a str,
            _body: Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            Box::pin(async { Err(AppError::Storage("disk full".into())) })
        }

        fn get<'a>(
            &'a self,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, AppError>> + Send + 'a>> {
            self.0.get(key)
        }

        fn delete<'a>(
            &'a self,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
            self.0.delete(key)
        }

        fn list_page<'a>(
            &'a self,
            prefix: &'a str,
            start_after: Option<&'a str>,
            limit: usize,
        ) -> Pin<Box<dyn Future<Output = Result<ListPage, AppError>> + Send + 'a>> {
            self.0.list_page(prefix, start_after, limit)
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn dispatcher(
        store: Arc<dyn ObjectStore>,
        invoker: Arc<dyn ChunkInvoker>,
        max_attempts: u32,
    ) -> Dispatcher {
        Dispatcher::new(store, invoker, 2, 1024 * 1024, 4, fast_retry(max_attempts))
    }

    const FIVE_ROWS: &[u8] = b"asin,title\nA1,a\nA2,b\nA3,c\nA4,d\nA5,e\n";

    #[tokio::test]
    async fn test_manifest_precedes_every_invocation() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let invoker = Arc::new(RecordingInvoker::new(store.clone(), 0));
        let dispatcher = dispatcher(store.clone(), invoker.clone(), 3);

        let job = dispatcher
            .create_job(FIVE_ROWS.to_vec(), Policy::default(), Arc::new(Taxonomy::default()))
            .await
            .unwrap();
        assert_eq!(job.total_rows, 5);
        assert_eq!(job.total_chunks, 3);

        let report = job.dispatch.await.unwrap();
        assert_eq!(report.dispatched, 3);
        assert!(report.failed.is_empty());

        let mut seen = invoker.seen();
        seen.sort_by(|a, b| a.0.chunk_id.cmp(&b.0.chunk_id));
        assert!(seen.iter().all(|(_, manifest_present)| *manifest_present));
        assert_eq!(
            seen.iter().map(|(t, _)| t.row_range).collect::<Vec<_>>(),
            vec![RowRange::new(0, 2), RowRange::new(2, 4), RowRange::new(4, 5)]
        );

        let manifest = jobs::read_manifest(store.as_ref(), &job.job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(manifest.chunks_created, 3);
        assert!(store.get(&jobs::input_key(&job.job_id)).await.unwrap().is_some());
        assert!(jobs::read_context(store.as_ref(), &job.job_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unreadable_input_creates_nothing() {
        let store = Arc::new(MemoryObjectStore::new());
        let invoker = Arc::new(RecordingInvoker::new(store.clone(), 0));
        let dispatcher = dispatcher(store.clone(), invoker.clone(), 3);

        let err = dispatcher
            .create_job(b"sku,price\nA1,3\n".to_vec(), Policy::default(), Arc::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InputUnreadable(_)));

        let page = store.list_page("jobs/", None, 10).await.unwrap();
        assert!(page.keys.is_empty());
        assert!(invoker.seen().is_empty());
    }

    #[tokio::test]
    async fn test_manifest_failure_issues_no_job() {
        let store = Arc::new(NoCreateStore(MemoryObjectStore::new()));
        let invoker = Arc::new(RecordingInvoker::new(store.clone(), 0));
        let dispatcher = dispatcher(store.clone(), invoker.clone(), 3);

        let err = dispatcher
            .create_job(FIVE_ROWS.to_vec(), Policy::default(), Arc::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ManifestWriteFailed { .. }));
        assert!(invoker.seen().is_empty());

        // Input and context of the aborted job are not left behind
        let page = store.list_page("jobs/", None, 10).await.unwrap();
        assert!(page.keys.is_empty(), "orphaned objects: {:?}", page.keys);
    }

    #[tokio::test]
    async fn test_transient_dispatch_failure_is_retried() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let invoker = Arc::new(RecordingInvoker::new(store.clone(), 2));
        let dispatcher = dispatcher(store.clone(), invoker.clone(), 3);

        let job = dispatcher
            .create_job(b"asin,title\nA1,a\n".to_vec(), Policy::default(), Arc::default())
            .await
            .unwrap();
        let report = job.dispatch.await.unwrap();

        assert_eq!(report.dispatched, 1);
        assert!(report.failed.is_empty());
        assert_eq!(invoker.seen().len(), 3);
    }

    #[tokio::test]
    async fn test_persistent_dispatch_failure_is_recorded() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let invoker = Arc::new(RecordingInvoker::new(store.clone(), u32::MAX));
        let dispatcher = dispatcher(store.clone(), invoker.clone(), 2);

        let job = dispatcher
            .create_job(FIVE_ROWS.to_vec(), Policy::default(), Arc::default())
            .await
            .unwrap();
        let report = job.dispatch.await.unwrap();

        assert_eq!(report.dispatched, 0);
        assert_eq!(report.failed, vec!["chunk-00000", "chunk-00001", "chunk-00002"]);
        assert_eq!(invoker.seen().len(), 6);

        let key = jobs::dispatch_failure_key(&job.job_id, "chunk-00001");
        let body = store.get(&key).await.unwrap().unwrap();
        let failure: DispatchFailure = serde_json::from_slice(&body).unwrap();
        assert_eq!(failure.attempts, 2);
        assert!(failure.message.contains("worker unavailable"));
    }

    #[tokio::test]
    async fn test_header_only_input_has_zero_chunks() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let invoker = Arc::new(RecordingInvoker::new(store.clone(), 0));
        let dispatcher = dispatcher(store.clone(), invoker.clone(), 3);

        let job = dispatcher
            .create_job(b"asin,title\n".to_vec(), Policy::default(), Arc::default())
            .await
            .unwrap();
        assert_eq!(job.total_chunks, 0);
        assert_eq!(job.dispatch.await.unwrap(), DispatchReport::default());
    }
}
