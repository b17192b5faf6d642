//! Fixed-size pool running inbound remote requests off the transport's
//! delivery threads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use crate::error::{ClusterError, ClusterResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    size: usize,
}

impl WorkerPool {
    /// Start `threads` workers
    pub fn new(threads: usize) -> ClusterResult<Self> {
        if threads == 0 {
            return Err(ClusterError::Configuration(
                "worker pool needs at least one thread".to_string(),
            ));
        }

        let (sender, receiver) = unbounded::<Job>();
        let running = Arc::new(AtomicBool::new(true));

        let mut handles = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            handles.push(Self::start_worker_thread(worker_id, receiver.clone())?);
        }

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            running,
            size: threads,
        })
    }

    fn start_worker_thread(worker_id: usize, jobs: Receiver<Job>) -> ClusterResult<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name(format!("cluster-worker-{}", worker_id))
            .spawn(move || {
                // Ends once every sender is dropped and the queue is drained
                while let Ok(job) = jobs.recv() {
                    job();
                }
            })?;
        Ok(handle)
    }

    /// Queue a job. Returns false once the pool is shut down.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop accepting jobs, let queued jobs finish and join the workers.
    /// Safe to call repeatedly and from a worker thread.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.sender.lock().take();

        let current = thread::current().id();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runs_queued_jobs_before_shutdown() {
        let pool = WorkerPool::new(3).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            assert!(pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let pool = WorkerPool::new(1).unwrap();
        pool.shutdown();
        pool.shutdown();

        assert!(!pool.is_running());
        assert!(!pool.execute(|| {}));
    }

    #[test]
    fn test_zero_threads_is_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(ClusterError::Configuration(_))));
    }
}
