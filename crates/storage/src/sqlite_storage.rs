//! SQLite storage backend.
//!
//! Jobs and tasks are stored as JSON documents alongside the columns the
//! worker filters on. This is also the only backend that can run the raw
//! statements issued by query tasks.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;
use jobworker_core::{Job, JobId, ServiceId, Task, Time};
use std::path::Path;

use super::trait_::{owned_tasks, Result, ServiceRecord, Storage, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a database file.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (job_id, id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_job ON tasks(job_id, position)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(())
    }

    async fn load_service(&self, id: &ServiceId) -> Result<ServiceRecord> {
        let row = sqlx::query("SELECT data FROM services WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("service {}", id)))?;
        Ok(serde_json::from_str(&Self::get_string(&row, "data"))?)
    }

    async fn save_service(&self, record: &ServiceRecord) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO services (id, data) VALUES (?, ?)")
            .bind(record.id.to_string())
            .bind(serde_json::to_string(record)?)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    /// Helper to extract string from row.
    fn get_string(row: &sqlx::sqlite::SqliteRow, column: &str) -> String {
        row.try_get(column).unwrap_or_default()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_job(&self, job: &Job, tasks: &[Task]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        sqlx::query("INSERT OR REPLACE INTO jobs (id, status, data, updated_at) VALUES (?, ?, ?, ?)")
            .bind(job.id.to_string())
            .bind(job.status.as_str())
            .bind(serde_json::to_string(job)?)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        sqlx::query("DELETE FROM tasks WHERE job_id = ?")
            .bind(job.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let tasks = owned_tasks(job, tasks);
        for (position, task) in tasks.iter().enumerate() {
            sqlx::query(
                "INSERT OR REPLACE INTO tasks (id, job_id, position, status, data, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(task.id.to_string())
            .bind(job.id.to_string())
            .bind(position as i64)
            .bind(task.status.as_str())
            .bind(serde_json::to_string(task)?)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT data FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await;

        match row {
            Ok(row) => {
                let job: Job = serde_json::from_str(&Self::get_string(&row, "data"))?;
                Ok(Some(job))
            }
            Err(sqlx::Error::RowNotFound) => Ok(None),
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn load_tasks(&self, job_id: &JobId) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT data FROM tasks WHERE job_id = ? ORDER BY position")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(serde_json::from_str(&Self::get_string(&row, "data"))?);
        }
        Ok(tasks)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT data FROM jobs ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(serde_json::from_str(&Self::get_string(&row, "data"))?);
        }
        Ok(jobs)
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET status = ?, data = ?, updated_at = ? WHERE id = ?")
            .bind(job.status.as_str())
            .bind(serde_json::to_string(job)?)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(job.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?, data = ?, updated_at = ? WHERE job_id = ? AND id = ?",
        )
        .bind(task.status.as_str())
        .bind(serde_json::to_string(task)?)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(task.job_id.to_string())
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task {}", task.id)));
        }
        Ok(())
    }

    async fn execute_statement(&self, statement: &str) -> Result<()> {
        sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    async fn register_service(&self, name: &str) -> Result<ServiceRecord> {
        let record = ServiceRecord::new(name);
        self.save_service(&record).await?;
        Ok(record)
    }

    async fn heartbeat(&self, id: &ServiceId, at: Time) -> Result<()> {
        let mut record = self.load_service(id).await?;
        record.last_heartbeat = at;
        self.save_service(&record).await
    }

    async fn service_down(&self, id: &ServiceId) -> Result<()> {
        let mut record = self.load_service(id).await?;
        record.active = false;
        self.save_service(&record).await
    }
}
