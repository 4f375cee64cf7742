//! Fixed-size worker pool used for intra-stage fan-out.

use crate::error::{Result, VoxError};
use crossbeam_channel::{Sender, unbounded};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool of worker threads pulling jobs from a shared FIFO.
///
/// Jobs start in submission order; at most `size` run at once.
pub struct WorkerPool {
    name: String,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` workers (at least one) named `{name}-worker-{i}`.
    pub fn new(name: &str, size: usize) -> Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size.max(1));
        for i in 0..size.max(1) {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                })
                .map_err(|source| VoxError::ThreadSpawn {
                    component: name.to_string(),
                    source,
                })?;
            workers.push(handle);
        }
        Ok(Self {
            name: name.to_string(),
            jobs: Some(tx),
            workers,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job for the next free worker.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Some(jobs) = &self.jobs {
            // Workers only exit after `jobs` is dropped, so the channel is open.
            jobs.send(Box::new(job)).ok();
        }
    }

    /// Waits until every submitted job has finished, then stops the workers.
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.jobs.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!(pool = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_size_spawns_one_worker() {
        let pool = WorkerPool::new("test", 0).unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_join_waits_for_all_jobs() {
        let pool = WorkerPool::new("test", 3).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = done.clone();
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(5));
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join();
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_concurrency_is_bounded_by_size() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let active = active.clone();
            let peak = peak.clone();
            pool.submit(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }
        pool.join();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
