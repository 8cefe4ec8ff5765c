use crate::{Error, Result};
use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Per-URL memo of parsed indexes and headers.
///
/// Concurrent lookups of the same key share one build. Failures describing
/// the file itself (corrupt or unsupported data) stay cached; anything else,
/// such as a network error, is evicted so the next lookup retries.
pub struct FileCache<T> {
    entries: Cache<String, std::result::Result<Arc<T>, Error>>,
}

impl<T: Send + Sync + 'static> FileCache<T> {
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(capacity).build(),
        }
    }

    pub async fn get_or_build<F, Fut>(&self, key: &str, build: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send,
    {
        let result = self
            .entries
            .get_with(key.to_string(), async move { build().await.map(Arc::new) })
            .await;
        if let Err(err) = &result {
            if !err.is_persistent() {
                debug!(key, error = %err, "evicting transient failure");
                self.entries.invalidate(key).await;
            }
        }
        result
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.invalidate(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_builds_once() {
        let cache = FileCache::new(10);
        let builds = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_build("a", || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(7u32)
                })
                .await
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_corrupt_failures_are_cached_network_failures_are_not() {
        let cache: FileCache<u32> = FileCache::new(10);
        let builds = AtomicUsize::new(0);

        for _ in 0..2 {
            let err = cache
                .get_or_build("corrupt", || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Err(Error::CorruptIndex("bad magic".to_string()))
                })
                .await
                .unwrap_err();
            assert!(matches!(err, Error::CorruptIndex(_)));
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        for _ in 0..2 {
            let _ = cache
                .get_or_build("flaky", || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Network("reset".to_string()))
                })
                .await;
        }
        assert_eq!(builds.load(Ordering::SeqCst), 3);

        cache.invalidate("corrupt").await;
        let value = cache.get_or_build("corrupt", || async { Ok(1) }).await.unwrap();
        assert_eq!(*value, 1);
    }
}
