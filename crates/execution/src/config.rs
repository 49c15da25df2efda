//! Worker configuration.

use std::time::Duration;

/// Sizing and naming for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Name used in logs and in the service registry
    pub instance_name: String,
    /// Number of job slots (jobs run concurrently)
    pub job_workers: usize,
    /// Task workers per slot
    pub task_workers: usize,
    /// Capacity of each slot's dispatch channel
    pub dispatch_buffer: usize,
    /// Interval between service heartbeats
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            instance_name: "Job".to_string(),
            job_workers: 3,
            task_workers: 3,
            dispatch_buffer: 100,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance name.
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Set the number of job slots.
    pub fn with_job_workers(mut self, n: usize) -> Self {
        self.job_workers = n.max(1);
        self
    }

    /// Set the number of task workers per slot.
    pub fn with_task_workers(mut self, n: usize) -> Self {
        self.task_workers = n.max(1);
        self
    }

    /// Set the dispatch channel capacity.
    pub fn with_dispatch_buffer(mut self, n: usize) -> Self {
        self.dispatch_buffer = n.max(1);
        self
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}
