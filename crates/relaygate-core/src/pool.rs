//! Bounded dispatch pool for inbound messages.
//!
//! Read loops hand payloads to a fixed set of workers through a bounded
//! queue. When every worker is busy and the queue is full, `submit` waits,
//! which in turn stops the read loop from pulling more frames off the socket.

use std::{future::Future, pin::Pin, sync::{Arc, Mutex}};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::error::PoolError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Fixed-size worker pool with a bounded job queue.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks draining a queue of `queue` jobs. Both are
    /// clamped to at least one.
    pub fn new(workers: usize, queue: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!(worker, "dispatch worker stopped");
                })
            })
            .collect();

        Self { sender: Mutex::new(Some(tx)), workers: Mutex::new(handles) }
    }

    /// Queue a job, waiting while the queue is full.
    pub async fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock().ok().and_then(|s| s.clone()).ok_or(PoolError::Closed)?;
        sender.send(Box::pin(job)).await.map_err(|_| PoolError::Closed)
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        for handle in self.close() {
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatch worker panicked");
            }
        }
    }

    /// Stop accepting jobs and cancel the running and queued ones.
    pub fn abort(&self) {
        let handles = self.close();
        if !handles.is_empty() {
            warn!(workers = handles.len(), "aborting dispatch workers");
        }
        for handle in handles {
            handle.abort();
        }
    }

    fn close(&self) -> Vec<JoinHandle<()>> {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        }
    }

    /// Whether `shutdown` or `abort` has been called.
    pub fn is_closed(&self) -> bool {
        self.sender.lock().map(|s| s.is_none()).unwrap_or(true)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("closed", &self.is_closed()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn runs_submitted_jobs() {
        let pool = WorkerPool::new(4, 8);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let count = Arc::clone(&count);
            pool.submit(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }
        pool.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn abort_cancels_stuck_jobs() {
        let pool = WorkerPool::new(1, 1);
        let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();
        pool.submit(async move {
            let _held = held_tx;
            std::future::pending::<()>().await;
        })
        .await
        .unwrap();

        pool.abort();
        assert!(pool.is_closed());
        assert!(held_rx.await.is_err());
        assert!(matches!(pool.submit(async {}).await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails() {
        let pool = WorkerPool::new(1, 1);
        pool.shutdown().await;
        assert!(pool.is_closed());
        assert!(matches!(pool.submit(async {}).await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let pool = WorkerPool::new(1, 1);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        // Occupy the only worker.
        pool.submit(async move {
            let _ = release_rx.await;
        })
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Fill the queue.
        pool.submit(async {}).await.unwrap();

        let blocked = tokio::time::timeout(std::time::Duration::from_millis(50), pool.submit(async {})).await;
        assert!(blocked.is_err(), "submit should wait while the queue is full");

        release_tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), pool.submit(async {}))
            .await
            .unwrap()
            .unwrap();
        pool.shutdown().await;
    }
}
