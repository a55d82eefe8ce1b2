//! Key/value object store abstraction.
//!
//! Everything a job produces lives under string keys in one store. Keys are
//! ordered byte-wise so prefix listings are stable and resumable.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Bound;
use std::pin::Pin;
use std::sync::Mutex;

use crate::error::AppError;

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    /// Pass as `start_after` to fetch the next page. `None` on the last page.
    pub next_start_after: Option<String>,
}

/// Durable object storage used by the dispatcher, chunk workers and reconciler.
///
/// Implementations must make `put` a full overwrite and `create` an atomic
/// insert-if-absent.
pub trait ObjectStore: Send + Sync {
    /// Writes `body` at `key`, replacing any previous value.
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// Writes `body` at `key` only if the key does not exist yet.
    ///
    /// Fails with `AppError::AlreadyExists` otherwise.
    fn create<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, AppError>> + Send + 'a>>;

    /// Removes `key`. Deleting a missing key is not an error.
    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// Lists up to `limit` keys starting with `prefix`, in key order, strictly
    /// after `start_after` when given.
    fn list_page<'a>(
        &'a self,
        prefix: &'a str,
        start_after: Option<&'a str>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<ListPage, AppError>> + Send + 'a>>;
}

impl ListPage {
    /// Builds a page from at most `limit` keys, setting the continuation
    /// marker only when the page is full.
    pub(crate) fn from_keys(keys: Vec<String>, limit: usize) -> Self {
        let next_start_after = if keys.len() >= limit && limit > 0 {
            keys.last().cloned()
        } else {
            None
        };
        Self {
            keys,
            next_start_after,
        }
    }
}

/// In-process store for tests and ephemeral runs. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, AppError> {
        self.objects
            .lock()
            .map_err(|_| AppError::Storage("memory store lock poisoned".to_string()))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            self.lock()?.insert(key.to_string(), body);
            Ok(())
        })
    }

    fn create<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            let mut objects = self.lock()?;
            if objects.contains_key(key) {
                return Err(AppError::AlreadyExists(key.to_string()));
            }
            objects.insert(key.to_string(), body);
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, AppError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.lock()?.get(key).cloned()) })
    }

    fn delete<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(async move {
            self.lock()?.remove(key);
            Ok(())
        })
    }

    fn list_page<'a>(
        &'a self,
        prefix: &'a str,
        start_after: Option<&'a str>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<ListPage, AppError>> + Send + 'a>> {
        Box::pin(async move {
            let objects = self.lock()?;
            let lower = match start_after {
                Some(after) if after >= prefix => Bound::Excluded(after.to_string()),
                _ => Bound::Included(prefix.to_string()),
            };

            let keys: Vec<String> = objects
                .range((lower, Bound::Unbounded))
                .map(|(k, _)| k)
                .take_while(|k| k.starts_with(prefix))
                .take(limit)
                .cloned()
                .collect();

            Ok(ListPage::from_keys(keys, limit))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> MemoryObjectStore {
        let store = MemoryObjectStore::new();
        for key in [
            "a/1",
            "jobs/x/results/chunk-00000",
            "jobs/x/results/chunk-00001",
            "jobs/x/results/chunk-00002",
            "jobs/y/results/chunk-00000",
        ] {
            store.put(key, b"{}".to_vec()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn put_overwrites_and_get_reads_back() {
        let store = MemoryObjectStore::new();
        store.put("k", b"one".to_vec()).await.unwrap();
        store.put("k", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn create_refuses_existing_key() {
        let store = MemoryObjectStore::new();
        store.create("manifest", b"first".to_vec()).await.unwrap();

        let err = store.create("manifest", b"second".to_vec()).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
        assert_eq!(store.get("manifest").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_key_and_tolerates_missing() {
        let store = seeded().await;
        store.delete("jobs/x/results/chunk-00001").await.unwrap();
        store.delete("jobs/x/results/chunk-00001").await.unwrap();

        assert_eq!(store.get("jobs/x/results/chunk-00001").await.unwrap(), None);
        let page = store.list_page("jobs/x/results/", None, 10).await.unwrap();
        assert_eq!(page.keys.len(), 2);
    }

    #[tokio::test]
    async fn list_pages_through_prefix() {
        let store = seeded().await;

        let first = store.list_page("jobs/x/results/", None, 2).await.unwrap();
        assert_eq!(
            first.keys,
            vec!["jobs/x/results/chunk-00000", "jobs/x/results/chunk-00001"]
        );
        let marker = first.next_start_after.clone().unwrap();

        let second = store
            .list_page("jobs/x/results/", Some(&marker), 2)
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["jobs/x/results/chunk-00002"]);
        assert_eq!(second.next_start_after, None);
    }

    #[tokio::test]
    async fn list_of_unknown_prefix_is_empty() {
        let store = seeded().await;
        let page = store.list_page("jobs/z/", None, 10).await.unwrap();
        assert!(page.keys.is_empty());
        assert_eq!(page.next_start_after, None);
    }
}
