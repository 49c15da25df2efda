//! Worker pool supervisor.
//!
//! Owns the job slots of one worker process and exposes how many jobs are in
//! flight, so the process entry point can wait for a clean drain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::engine::JobRunner;
use crate::error::Result;
use crate::queue::JobQueue;

/// Shared count of jobs currently being run.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobs(Arc<AtomicUsize>);

impl ActiveJobs {
    /// Current count.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Count one job until the returned guard is dropped.
    pub fn enter(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(self.0.clone())
    }
}

/// Decrements the active-job count on drop.
#[derive(Debug)]
pub struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A set of job slots reading from one queue.
pub struct WorkerPool {
    slots: Vec<JoinHandle<Result<usize>>>,
    active: ActiveJobs,
}

impl WorkerPool {
    /// Spawn `runner.config().job_workers` slots consuming `queue`.
    pub fn start(runner: JobRunner, queue: Arc<dyn JobQueue>) -> Self {
        let active = ActiveJobs::default();
        let n = runner.config().job_workers.max(1);
        info!("Starting {} job slots", n);

        let slots = (0..n)
            .map(|slot| {
                let runner = runner.clone().with_active_jobs(active.clone()).with_slot(slot);
                let queue = queue.clone();
                tokio::spawn(async move { runner.process(queue.as_ref()).await })
            })
            .collect();

        Self { slots, active }
    }

    /// Jobs currently running across all slots.
    pub fn active_jobs(&self) -> usize {
        self.active.get()
    }

    /// A handle to the active-job counter.
    pub fn active_counter(&self) -> ActiveJobs {
        self.active.clone()
    }

    /// Wait for every slot to drain the closed queue.
    ///
    /// Returns the total number of jobs taken.
    pub async fn join(self) -> usize {
        let mut total = 0;
        for handle in self.slots {
            match handle.await {
                Ok(Ok(n)) => total += n,
                Ok(Err(e)) => error!("Job slot stopped: {}", e),
                Err(e) => error!("Job slot panicked: {}", e),
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_guard_counts() {
        let active = ActiveJobs::default();
        let a = active.enter();
        let b = active.enter();
        assert_eq!(active.get(), 2);
        drop(a);
        assert_eq!(active.get(), 1);
        drop(b);
        assert_eq!(active.get(), 0);
    }
}
