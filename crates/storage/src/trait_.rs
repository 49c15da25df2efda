//! Storage trait abstraction.

use async_trait::async_trait;
use jobworker_core::{Job, JobId, ServiceId, Task, Time};
use serde::{Deserialize, Serialize};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not offered by this backend
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Statement rejected by the data store
    #[error("Database error: {0}")]
    Database(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// A worker process registered with the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service id
    pub id: ServiceId,
    /// Human name given at start-up
    pub name: String,
    /// Registration time
    pub registered_at: Time,
    /// Last heartbeat received
    pub last_heartbeat: Time,
    /// False once the service has shut down
    pub active: bool,
}

impl ServiceRecord {
    /// A freshly registered, active service.
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: ServiceId::new(),
            name: name.into(),
            registered_at: now,
            last_heartbeat: now,
            active: true,
        }
    }
}

/// Copy `tasks`, pointing each one at `job`.
///
/// Backends key task updates on the task's own `job_id`, so a task stored
/// under another job would never be found again.
pub(crate) fn owned_tasks(job: &Job, tasks: &[Task]) -> Vec<Task> {
    tasks
        .iter()
        .map(|task| {
            let mut task = task.clone();
            task.job_id = job.id.clone();
            task
        })
        .collect()
}

/// Persistence collaborator for the worker.
///
/// Methods take `&self` so one backend can be shared across every worker
/// task of every pool slot behind an `Arc<dyn Storage>`.
#[async_trait]
pub trait Storage: Send + Sync {
    // === Job operations ===

    /// Store a new job together with its task set, in task order.
    async fn insert_job(&self, job: &Job, tasks: &[Task]) -> Result<()>;

    /// Load a job header by ID.
    async fn load_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// Load a job's tasks in insertion order.
    async fn load_tasks(&self, job_id: &JobId) -> Result<Vec<Task>>;

    /// List all job headers.
    async fn list_jobs(&self) -> Result<Vec<Job>>;

    /// Overwrite a job header.
    async fn update_job(&self, job: &Job) -> Result<()>;

    /// Overwrite one task.
    async fn update_task(&self, task: &Task) -> Result<()>;

    // === Raw statements ===

    /// Execute a raw data-store statement.
    async fn execute_statement(&self, statement: &str) -> Result<()>;

    // === Service registry ===

    /// Register a worker service.
    async fn register_service(&self, name: &str) -> Result<ServiceRecord>;

    /// Record a heartbeat.
    async fn heartbeat(&self, id: &ServiceId, at: Time) -> Result<()>;

    /// Mark a service as stopped.
    async fn service_down(&self, id: &ServiceId) -> Result<()>;
}
