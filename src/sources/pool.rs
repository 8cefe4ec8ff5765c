use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded pool for CPU-bound decoding (inflate, parse) shared by every
/// track. Work runs on tokio's blocking threads; at most `workers` jobs run
/// at once and the rest wait for a permit.
#[derive(Debug, Clone)]
pub struct DecodePool {
    permits: Arc<Semaphore>,
}

impl DecodePool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `job` on a blocking thread once a permit is free. The permit
    /// moves into the job, so it is held until the job returns even if the
    /// awaiting task is aborted.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("decode pool closed: {}", e)))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| Error::Internal(format!("decode job failed: {}", e)))?
    }
}

impl Default for DecodePool {
    fn default() -> Self {
        Self::new(
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(4),
        )
    }
}
