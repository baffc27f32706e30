//! Bounded work queue drained by a fixed pool of Tokio tasks.
//!
//! Producers wait in [`WorkQueue::submit`] while the queue is full; idle
//! workers wait for the next job. Jobs start in submission order but may
//! finish in any order.

use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Pending requests accepted before `submit` starts waiting.
pub const QUEUE_CAPACITY: usize = 16;

pub struct WorkQueue<J> {
    tx: mpsc::Sender<J>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static> WorkQueue<J> {
    /// Spawn `size` workers that run `handler` on every submitted job.
    pub fn start<H, Fut>(size: usize, capacity: usize, handler: H) -> Self
    where
        H: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<J>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);

        let workers = (0..size.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };
                        log::debug!("Worker {id} picked up a job");
                        handler(job).await;
                    }
                    log::debug!("Worker {id} stopped");
                })
            })
            .collect();
        log::info!("Started {} workers", size.max(1));

        Self { tx, workers }
    }

    /// Queue `job`, waiting for room if the queue is full.
    pub async fn submit(&self, job: J) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| anyhow!("work queue is closed"))
    }

    /// Stop accepting jobs and wait until the workers have finished
    /// everything already queued.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            if let Err(e) = worker.await {
                log::error!("Worker task failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn every_job_is_processed_before_shutdown_returns() {
        let done = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&done);
        let queue = WorkQueue::start(3, 2, move |n: usize| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(n, Ordering::SeqCst);
            }
        });
        for n in 1..=10 {
            queue.submit(n).await.unwrap();
        }
        queue.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 55);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_runs_more_jobs_than_workers() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        let queue = WorkQueue::start(2, QUEUE_CAPACITY, move |_: ()| {
            let (active, peak) = (Arc::clone(&a), Arc::clone(&p));
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        });
        for _ in 0..8 {
            queue.submit(()).await.unwrap();
        }
        queue.shutdown().await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn submit_waits_while_the_queue_is_full() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let released = Arc::clone(&gate);
        let queue = WorkQueue::start(1, 1, move |_: u8| {
            let gate = Arc::clone(&released);
            async move { gate.notified().await }
        });

        // One job running, one queued; the third has nowhere to go.
        queue.submit(1).await.unwrap();
        queue.submit(2).await.unwrap();
        let third = tokio::time::timeout(Duration::from_millis(50), queue.submit(3)).await;
        assert!(third.is_err());

        gate.notify_waiters();
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate.notify_one();
        queue.shutdown().await;
    }
}
