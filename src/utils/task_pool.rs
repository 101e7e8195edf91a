use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of workers running blocking closures off the async runtime.
///
/// Jobs beyond the worker count wait in a FIFO queue. There is no cancellation: a
/// submitted job always runs, even when its handle has been dropped.
pub struct TaskPool {
    queue: mpsc::UnboundedSender<Job>,
    queued: Arc<AtomicUsize>,
    worker_count: usize,
    _workers: Vec<tokio::task::JoinHandle<()>>,
}

/// Result of a pooled job.
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    pub async fn join(self) -> anyhow::Result<T> {
        self.rx.await.map_err(|_| anyhow!("pooled task panicked before producing a result"))
    }
}

impl TaskPool {
    /// Must be called from within a tokio runtime.
    pub fn new(worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let (queue, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let queued = Arc::new(AtomicUsize::new(0));

        let workers = (0..worker_count)
            .map(|worker| {
                let rx = rx.clone();
                let queued = queued.clone();
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else { break };
                        queued.fetch_sub(1, Ordering::SeqCst);
                        if let Err(e) = tokio::task::spawn_blocking(job).await {
                            error!("[POOL] Worker {} job failed: {}", worker, e);
                        }
                    }
                    debug!("[POOL] Worker {} stopped", worker);
                })
            })
            .collect();

        info!("[POOL] Started {} workers", worker_count);
        Self {
            queue,
            queued,
            worker_count,
            _workers: workers,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Jobs submitted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn submit<T, F>(&self, job: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.queued.fetch_add(1, Ordering::SeqCst);
        let wrapped: Job = Box::new(move || {
            let _ = tx.send(job());
        });
        if self.queue.send(wrapped).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            error!("[POOL] Queue closed, job dropped");
        }
        TaskHandle { rx }
    }

    /// Run a single job on its own blocking thread, bypassing the queue.
    pub async fn run_once<T, F>(job: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| anyhow!("one-shot task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn pooled_jobs_return_results() {
        let pool = TaskPool::new(2);
        let handles: Vec<_> = (0..6u64).map(|i| pool.submit(move || i * i)).collect();
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.join().await.unwrap());
        }
        assert_eq!(results, vec![0, 1, 4, 9, 16, 25]);
        assert_eq!(pool.queued(), 0);
    }

    #[tokio::test]
    async fn single_worker_runs_jobs_in_submission_order() {
        let pool = TaskPool::new(1);
        let order = Arc::new(StdMutex::new(Vec::new()));
        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = order.clone();
                pool.submit(move || order.lock().unwrap().push(i))
            })
            .collect();
        for handle in handles {
            handle.join().await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn dropped_handles_still_run() {
        let pool = TaskPool::new(1);
        let ran = Arc::new(AtomicUsize::new(0));
        let flag = ran.clone();
        drop(pool.submit(move || flag.fetch_add(1, Ordering::SeqCst)));
        pool.submit(|| ()).join().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_shot_runs_outside_the_queue() {
        let value = TaskPool::run_once(|| "done".to_string()).await.unwrap();
        assert_eq!(value, "done");
    }
}
