//! Fixed-size worker pools sharing a FIFO job queue.
//!
//! A pool owns a fixed group of OS threads that block on one queue.
//! Enqueueing a job wakes exactly one idle worker. Workers use a short
//! timed condvar wait so the shutdown flag is observed promptly even
//! when the queue stays empty.
//!
//! Jobs run to completion on the worker that picked them up; a job that
//! wants follow-up work enqueues it on another pool itself. A panicking
//! job is caught and logged, and costs nothing beyond its own slot.

use std::collections::VecDeque;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error};

use crate::sync;

/// Maximum queued jobs before `add_job` refuses new work.
const MAX_QUEUED_JOBS: usize = 1024;

/// How long a worker waits for work before re-checking the shutdown flag.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// A unit of work for a pool.
///
/// Anything `Send` with a `run` can be a job; closures qualify through
/// the blanket impl.
pub trait Job: Send {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send> Job for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// Errors from enqueueing work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The queue is at capacity.
    #[error("job queue is full")]
    QueueFull,

    /// The pool is shutting down and no longer accepts work.
    #[error("pool is shutting down")]
    ShuttingDown,
}

struct Inner {
    queue: VecDeque<Box<dyn Job>>,
    shutting_down: bool,
    live_workers: usize,
}

struct Shared {
    inner: Mutex<Inner>,
    work_available: Condvar,
    worker_exited: Condvar,
}

/// A fixed group of worker threads consuming one FIFO queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    name: String,
}

impl WorkerPool {
    /// Spawns `workers` named threads blocked on an empty queue.
    pub fn new(name: &str, workers: usize) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                shutting_down: false,
                live_workers: 0,
            }),
            work_available: Condvar::new(),
            worker_exited: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || worker_loop(shared))?;
            handles.push(handle);
        }
        sync::lock(&shared.inner).live_workers = handles.len();

        Ok(Self {
            shared,
            handles: Mutex::new(handles),
            name: name.to_owned(),
        })
    }

    /// Enqueues a job and wakes one waiting worker.
    pub fn add_job(&self, job: Box<dyn Job>) -> Result<(), PoolError> {
        let mut inner = sync::lock(&self.shared.inner);
        if inner.shutting_down {
            return Err(PoolError::ShuttingDown);
        }
        if inner.queue.len() >= MAX_QUEUED_JOBS {
            return Err(PoolError::QueueFull);
        }
        inner.queue.push_back(job);
        drop(inner);
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Stops the pool: flags shutdown, wakes every worker, and blocks
    /// until the live-worker count reaches zero. Queued jobs that no
    /// worker picked up are discarded. Idempotent.
    pub fn destroy(&self) {
        let mut inner = sync::lock(&self.shared.inner);
        inner.shutting_down = true;
        self.shared.work_available.notify_all();
        while inner.live_workers > 0 {
            let (guard, _) = self
                .shared
                .worker_exited
                .wait_timeout(inner, IDLE_WAIT)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
        let dropped = inner.queue.len();
        inner.queue.clear();
        drop(inner);

        if dropped > 0 {
            debug!(pool = %self.name, dropped, "discarded queued jobs on shutdown");
        }

        let handles = std::mem::take(&mut *sync::lock(&self.handles));
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Number of workers that have not exited.
    pub fn live_workers(&self) -> usize {
        sync::lock(&self.shared.inner).live_workers
    }

    /// Number of jobs waiting in the queue.
    pub fn queued_jobs(&self) -> usize {
        sync::lock(&self.shared.inner).queue.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// The worker thread body: pop and run jobs until the shutdown flag is
/// observed, then decrement the live count and signal the exit condvar.
fn worker_loop(shared: Arc<Shared>) {
    let mut inner = sync::lock(&shared.inner);
    loop {
        if inner.shutting_down {
            break;
        }
        if let Some(job) = inner.queue.pop_front() {
            drop(inner);
            if catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
                error!("job panicked; worker continues");
            }
            inner = sync::lock(&shared.inner);
        } else {
            let (guard, _) = shared
                .work_available
                .wait_timeout(inner, IDLE_WAIT)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
    }
    inner.live_workers -= 1;
    drop(inner);
    shared.worker_exited.notify_all();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn runs_submitted_jobs() {
        let pool = WorkerPool::new("test", 2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.add_job(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 10 {
            assert!(std::time::Instant::now() < deadline, "jobs did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn fifo_within_a_single_worker() {
        let pool = WorkerPool::new("fifo", 1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let order = Arc::clone(&order);
            pool.add_job(Box::new(move || {
                order.lock().unwrap().push(i);
            }))
            .unwrap();
        }

        pool.destroy();
        let order = order.lock().unwrap();
        // destroy may discard a queued tail, but what ran must be in order
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn destroy_leaves_no_workers_and_no_jobs() {
        let pool = WorkerPool::new("shutdown", 4).unwrap();
        pool.add_job(Box::new(|| {})).unwrap();
        pool.destroy();
        assert_eq!(pool.live_workers(), 0);
        assert_eq!(pool.queued_jobs(), 0);
    }

    #[test]
    fn add_job_after_destroy_is_refused() {
        let pool = WorkerPool::new("closed", 1).unwrap();
        pool.destroy();
        let err = pool.add_job(Box::new(|| {})).unwrap_err();
        assert_eq!(err, PoolError::ShuttingDown);
    }

    #[test]
    fn queue_fills_without_workers() {
        let pool = WorkerPool::new("bounded", 0).unwrap();
        for _ in 0..MAX_QUEUED_JOBS {
            pool.add_job(Box::new(|| {})).unwrap();
        }
        let err = pool.add_job(Box::new(|| {})).unwrap_err();
        assert_eq!(err, PoolError::QueueFull);
    }

    #[test]
    fn panicking_job_does_not_kill_the_worker() {
        let pool = WorkerPool::new("panicky", 1).unwrap();
        let (tx, rx) = mpsc::channel();

        pool.add_job(Box::new(|| panic!("boom"))).unwrap();
        pool.add_job(Box::new(move || {
            tx.send(()).unwrap();
        }))
        .unwrap();

        rx.recv_timeout(Duration::from_secs(5))
            .expect("worker should survive the panic and run the next job");
        assert_eq!(pool.live_workers(), 1);
    }

    #[test]
    fn jobs_can_enqueue_follow_up_work_on_another_pool() {
        let first = Arc::new(WorkerPool::new("stage-one", 1).unwrap());
        let second = Arc::new(WorkerPool::new("stage-two", 1).unwrap());
        let (tx, rx) = mpsc::channel();

        let second_handle = Arc::clone(&second);
        first
            .add_job(Box::new(move || {
                second_handle
                    .add_job(Box::new(move || {
                        tx.send(42).unwrap();
                    }))
                    .unwrap();
            }))
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
