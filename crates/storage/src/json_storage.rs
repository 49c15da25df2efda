//! JSON file storage implementation.
//!
//! Layout under the root directory:
//!
//! ```text
//! jobs/<job_id>.json       job header
//! tasks/<job_id>.json      array of tasks in insertion order
//! services/<id>.json       service registry entries
//! ```
//!
//! Raw statements are not supported; use the SQLite backend for query tasks.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use jobworker_core::{Job, JobId, ServiceId, Task, Time};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::trait_::{owned_tasks, Result, ServiceRecord, Storage, StorageError};

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    // Serializes read-modify-write cycles on the per-job task files.
    write_lock: Mutex<()>,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating its subdirectories.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join("jobs")).await?;
        fs::create_dir_all(root.join("tasks")).await?;
        fs::create_dir_all(root.join("services")).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn job_path(&self, id: &JobId) -> Result<PathBuf> {
        Ok(self.root.join("jobs").join(file_name(id.as_str())?))
    }

    fn tasks_path(&self, id: &JobId) -> Result<PathBuf> {
        Ok(self.root.join("tasks").join(file_name(id.as_str())?))
    }

    fn service_path(&self, id: &ServiceId) -> Result<PathBuf> {
        Ok(self.root.join("services").join(file_name(id.as_str())?))
    }

    async fn update_service<F>(&self, id: &ServiceId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ServiceRecord) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let path = self.service_path(id)?;
        let mut record: ServiceRecord = read_json(&path)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("service {}", id)))?;
        apply(&mut record);
        write_json(&path, &record).await
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn insert_job(&self, job: &Job, tasks: &[Task]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let tasks = owned_tasks(job, tasks);
        write_json(&self.job_path(&job.id)?, job).await?;
        write_json(&self.tasks_path(&job.id)?, &tasks).await?;
        debug!("Stored job {} with {} tasks", job.id, tasks.len());
        Ok(())
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>> {
        read_json(&self.job_path(id)?).await
    }

    async fn load_tasks(&self, job_id: &JobId) -> Result<Vec<Task>> {
        Ok(read_json(&self.tasks_path(job_id)?).await?.unwrap_or_default())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        list_dir(&self.root.join("jobs")).await
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.job_path(&job.id)?;
        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(format!("job {}", job.id)));
        }
        write_json(&path, job).await
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.tasks_path(&task.job_id)?;
        let mut tasks: Vec<Task> = read_json(&path).await?.unwrap_or_default();
        let slot = tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| StorageError::NotFound(format!("task {}", task.id)))?;
        *slot = task.clone();
        write_json(&path, &tasks).await
    }

    async fn execute_statement(&self, _statement: &str) -> Result<()> {
        Err(StorageError::Unsupported(
            "JSON storage cannot execute statements".to_string(),
        ))
    }

    async fn register_service(&self, name: &str) -> Result<ServiceRecord> {
        let record = ServiceRecord::new(name);
        write_json(&self.service_path(&record.id)?, &record).await?;
        Ok(record)
    }

    async fn heartbeat(&self, id: &ServiceId, at: Time) -> Result<()> {
        self.update_service(id, |r| r.last_heartbeat = at).await
    }

    async fn service_down(&self, id: &ServiceId) -> Result<()> {
        self.update_service(id, |r| r.active = false).await
    }
}

/// File name for an id, refusing anything that could leave its directory.
fn file_name(id: &str) -> Result<String> {
    if id.is_empty() || id.contains(['/', '\\', '\0']) || id.contains("..") {
        return Err(StorageError::Other(format!("invalid id for file storage: {:?}", id)));
    }
    Ok(format!("{}.json", id))
}

async fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json.as_bytes()).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Ok(Some(item)) = read_json(&entry.path()).await {
            items.push(item);
        }
    }
    Ok(items)
}
