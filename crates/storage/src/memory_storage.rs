//! In-process storage backend.
//!
//! Keeps everything in a mutex-guarded map. Executed statements are recorded
//! rather than run, which makes the backend useful for tests and dry runs.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use jobworker_core::{Job, JobId, ServiceId, Task, Time};
use tokio::sync::Mutex;

use super::trait_::{owned_tasks, Result, ServiceRecord, Storage, StorageError};

#[derive(Default)]
struct Inner {
    jobs: Vec<Job>,
    tasks: HashMap<JobId, Vec<Task>>,
    services: HashMap<ServiceId, ServiceRecord>,
    statements: Vec<String>,
    task_writes: usize,
}

/// Memory-backed storage.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements passed to [`Storage::execute_statement`], in order.
    pub async fn statements(&self) -> Vec<String> {
        self.inner.lock().await.statements.clone()
    }

    /// Number of successful `update_task` calls.
    pub async fn task_writes(&self) -> usize {
        self.inner.lock().await.task_writes
    }

    /// Look up a registered service.
    pub async fn service(&self, id: &ServiceId) -> Option<ServiceRecord> {
        self.inner.lock().await.services.get(id).cloned()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn insert_job(&self, job: &Job, tasks: &[Task]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job.clone(),
            None => inner.jobs.push(job.clone()),
        }
        inner.tasks.insert(job.id.clone(), owned_tasks(job, tasks));
        Ok(())
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.iter().find(|j| &j.id == id).cloned())
    }

    async fn load_tasks(&self, job_id: &JobId) -> Result<Vec<Task>> {
        let inner = self.inner.lock().await;
        Ok(inner.tasks.get(job_id).cloned().unwrap_or_default())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.inner.lock().await.jobs.clone())
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| StorageError::NotFound(format!("job {}", job.id)))?;
        *slot = job.clone();
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .tasks
            .get_mut(&task.job_id)
            .and_then(|tasks| tasks.iter_mut().find(|t| t.id == task.id))
            .ok_or_else(|| StorageError::NotFound(format!("task {}", task.id)))?;
        *slot = task.clone();
        inner.task_writes += 1;
        Ok(())
    }

    async fn execute_statement(&self, statement: &str) -> Result<()> {
        if statement.trim().is_empty() {
            return Err(StorageError::Database("empty statement".to_string()));
        }
        self.inner.lock().await.statements.push(statement.to_string());
        Ok(())
    }

    async fn register_service(&self, name: &str) -> Result<ServiceRecord> {
        let record = ServiceRecord::new(name);
        self.inner
            .lock()
            .await
            .services
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn heartbeat(&self, id: &ServiceId, at: Time) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .services
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("service {}", id)))?;
        record.last_heartbeat = at;
        Ok(())
    }

    async fn service_down(&self, id: &ServiceId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .services
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("service {}", id)))?;
        record.active = false;
        Ok(())
    }
}
