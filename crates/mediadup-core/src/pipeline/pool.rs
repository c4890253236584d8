//! Bounded worker pool for blocking per-file work.
//!
//! Each item runs on the blocking thread pool while holding a semaphore
//! permit, so at most `workers` items are in flight and the submission loop
//! waits for a free slot. Progress is reported as items complete.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

use crate::error::{PipelineError, PipelineResult};
use crate::media::MediaRecord;

/// Progress callback: `(completed, total)`.
pub type Progress = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// An item handed to a pool worker. The path names it in worker errors.
pub trait WorkItem: Send + 'static {
    fn path(&self) -> PathBuf;
}

impl WorkItem for String {
    fn path(&self) -> PathBuf {
        PathBuf::from(self)
    }
}

impl WorkItem for MediaRecord {
    fn path(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

/// A fixed-size pool of blocking workers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    workers: usize,
}

impl WorkerPool {
    pub fn new(name: &'static str, workers: usize) -> Self {
        Self {
            name,
            workers: workers.max(1),
        }
    }

    /// Run `work` over every item and wait for all of them.
    ///
    /// Results come back in completion order. A worker that panics is
    /// reported as [`PipelineError::Worker`] naming the item's path; the
    /// other items still run.
    pub async fn run<T, R, F>(
        &self,
        items: Vec<T>,
        work: F,
        progress: Option<Progress>,
    ) -> Vec<PipelineResult<R>>
    where
        T: WorkItem,
        R: Send + 'static,
        F: Fn(T) -> PipelineResult<R> + Send + Sync + 'static,
    {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let work = Arc::new(work);
        let completed = Arc::new(AtomicUsize::new(0));
        let mut running = FuturesUnordered::new();

        tracing::debug!("{} pool: {} items on {} workers", self.name, total, self.workers);

        for item in items {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                tracing::warn!("{} pool semaphore closed, stopping submission", self.name);
                break;
            };
            let work = work.clone();
            let completed = completed.clone();
            let progress = progress.clone();
            let path = item.path();

            let handle = tokio::task::spawn_blocking(move || {
                let result = work(item);
                drop(permit); // release the slot before reporting
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(progress) = progress {
                    progress(done, total);
                }
                result
            });
            running.push(async move { (path, handle.await) });
        }

        let mut results = Vec::with_capacity(total);
        while let Some((path, joined)) = running.next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!("{} worker panicked on {:?}: {e}", self.name, path);
                    results.push(Err(PipelineError::Worker {
                        path,
                        message: e.to_string(),
                    }));
                }
            }
        }
        results
    }
}
