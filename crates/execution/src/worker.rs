//! The per-task run contract.

use std::sync::Arc;
use jobworker_core::{Task, TaskStatus, DEFAULT_LANGUAGE};
use jobworker_storage::Storage;
use tracing::{debug, warn};

use crate::extract;
use crate::resolver::{self, Scope};
use crate::strategy::{ActionRequest, Outcome, StrategySet};

/// Executes single tasks: persist, resolve, call, persist.
///
/// Holds only shared, read-only handles, so any number of task workers can
/// clone one and run concurrently.
#[derive(Clone)]
pub struct TaskWorker {
    storage: Arc<dyn Storage>,
    strategies: Arc<StrategySet>,
}

impl TaskWorker {
    /// Create a worker over a storage backend and strategy set.
    pub fn new(storage: Arc<dyn Storage>, strategies: Arc<StrategySet>) -> Self {
        Self { storage, strategies }
    }

    /// Run a task to a terminal status and return it.
    ///
    /// The task is written to storage before and after the call. Storage
    /// failures are logged and do not change the outcome.
    pub async fn run(&self, mut task: Task, scope: &Scope, token: &str) -> Task {
        task.status = TaskStatus::Processing;
        task.start_at = Some(chrono::Utc::now());
        task.finish_at = None;
        task.response.clear();
        self.persist(&task).await;

        resolver::substitute(&mut task, scope);

        let strategy = self.strategies.get(task.action);
        let request = ActionRequest {
            action: task.action,
            address: task.address.clone(),
            payload: task.payload.clone(),
            timeout: task.timeout,
            token: token.to_string(),
            language: scope.system().value(DEFAULT_LANGUAGE),
        };
        debug!("Task {} ({}) running via {}", task.id, task.code, strategy.name());

        match strategy.execute(&request).await {
            Outcome::Completed { response } => {
                if let Some(body) = response {
                    task.response = body;
                    if task.action.is_api() {
                        extract::apply_outputs(&mut task.params, &task.response);
                    }
                }
                task.status = TaskStatus::Completed;
            }
            Outcome::Failed { response } => {
                if let Some(text) = response {
                    task.response = text;
                }
                task.status = TaskStatus::Fail;
            }
        }

        task.finish_at = Some(chrono::Utc::now());
        self.persist(&task).await;
        task
    }

    /// Issue the task's compensating call. The task stays failed.
    pub async fn rollback(&self, mut task: Task, scope: &Scope, token: &str) -> Task {
        task.status = TaskStatus::Rollbacking;
        self.persist(&task).await;

        resolver::substitute_rollback(&mut task, scope);

        let strategy = self.strategies.get(task.rollback_action);
        let request = ActionRequest {
            action: task.rollback_action,
            address: task.rollback_address.clone(),
            payload: task.rollback_payload.clone(),
            timeout: task.timeout,
            token: token.to_string(),
            language: scope.system().value(DEFAULT_LANGUAGE),
        };

        let outcome = strategy.execute(&request).await;
        if !outcome.is_completed() {
            warn!("Rollback of task {} ({}) failed", task.id, task.code);
        }
        let (Outcome::Completed { response } | Outcome::Failed { response }) = outcome;
        task.rollback_response = response.unwrap_or_default();

        task.status = TaskStatus::Fail;
        task.finish_at = Some(chrono::Utc::now());
        self.persist(&task).await;
        task
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.storage.update_task(task).await {
            warn!("Failed to persist task {}: {}", task.id, e);
        }
    }
}
