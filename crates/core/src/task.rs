//! Task model - one unit of work inside a job.

use serde::{Deserialize, Serialize};
use crate::id::{JobId, TaskId};
use crate::param::{self, Param};
use crate::Time;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Loaded, waiting to become eligible
    #[default]
    Created,
    /// Waiting in an intake queue
    Queued,
    /// Dispatched to a worker
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with warnings
    Warnings,
    /// Finished with an error
    Fail,
    /// Compensating call in progress
    Rollbacking,
    /// Re-dispatched after a failure
    Retrying,
    /// Never run because a failure policy cancelled it
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Warnings | TaskStatus::Fail | TaskStatus::Cancelled
        )
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Warnings => "warnings",
            TaskStatus::Fail => "fail",
            TaskStatus::Rollbacking => "rollbacking",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a task is executed.
///
/// Unknown or empty action names fall back to [`TaskAction::Delay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskAction {
    /// Raw data-store statement from the payload
    #[serde(rename = "exec_query")]
    Query,
    /// HTTP GET
    #[serde(rename = "api_get")]
    ApiGet,
    /// HTTP POST
    #[serde(rename = "api_post")]
    ApiPost,
    /// HTTP PATCH
    #[serde(rename = "api_patch")]
    ApiPatch,
    /// HTTP DELETE
    #[serde(rename = "api_delete")]
    ApiDelete,
    /// Sleep for the task timeout
    #[default]
    #[serde(rename = "delay", other)]
    Delay,
}

impl TaskAction {
    /// Whether this action is an HTTP call.
    pub fn is_api(&self) -> bool {
        self.http_method().is_some()
    }

    /// HTTP verb for API actions.
    pub fn http_method(&self) -> Option<&'static str> {
        match self {
            TaskAction::ApiGet => Some("GET"),
            TaskAction::ApiPost => Some("POST"),
            TaskAction::ApiPatch => Some("PATCH"),
            TaskAction::ApiDelete => Some("DELETE"),
            TaskAction::Query | TaskAction::Delay => None,
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Query => "exec_query",
            TaskAction::ApiGet => "api_get",
            TaskAction::ApiPost => "api_post",
            TaskAction::ApiPatch => "api_patch",
            TaskAction::ApiDelete => "api_delete",
            TaskAction::Delay => "delay",
        }
    }
}

/// Failure policy applied when a task ends in `fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    /// Record the failure and keep going
    #[default]
    Continue,
    /// Retry up to the limit, then keep going
    RetryAndContinue,
    /// Cancel every task that has not started
    Cancel,
    /// Retry up to the limit, then cancel
    RetryAndCancel,
    /// Issue the rollback call, then keep going
    Rollback,
    /// Issue the rollback call, then cancel
    RollbackAndCancel,
}

impl OnFail {
    /// Whether failed runs are retried.
    pub fn retries(&self) -> bool {
        matches!(self, OnFail::RetryAndContinue | OnFail::RetryAndCancel)
    }

    /// Whether a rollback call is issued.
    pub fn rolls_back(&self) -> bool {
        matches!(self, OnFail::Rollback | OnFail::RollbackAndCancel)
    }

    /// Whether pending tasks are cancelled once the failure is final.
    pub fn cancels(&self) -> bool {
        matches!(self, OnFail::Cancel | OnFail::RetryAndCancel | OnFail::RollbackAndCancel)
    }
}

/// A unit of work inside a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Instance id, unique per execution
    pub id: TaskId,

    /// Definition (template) id
    #[serde(rename = "task_id", default)]
    pub definition_id: String,

    /// Owning job instance
    #[serde(rename = "job_instance_id", default)]
    pub job_id: JobId,

    /// Stable name used in `{task.<code>.<key>}` tokens
    pub code: String,

    /// Current status
    #[serde(default)]
    pub status: TaskStatus,

    /// Set when the task is handed to a worker
    #[serde(default)]
    pub start_at: Option<Time>,

    /// Set when the worker finishes
    #[serde(default)]
    pub finish_at: Option<Time>,

    /// Stage number among siblings
    #[serde(rename = "task_sequence", default)]
    pub sequence: u32,

    /// Instance id of the parent task; empty for roots
    #[serde(default)]
    pub parent_id: String,

    /// Timeout in seconds (API calls) or sleep length (delay)
    #[serde(rename = "exec_timeout", default)]
    pub timeout: u64,

    /// Execution strategy
    #[serde(rename = "exec_action", default)]
    pub action: TaskAction,

    /// URL for API actions
    #[serde(rename = "exec_address", default)]
    pub address: String,

    /// Body for API actions, statement for queries
    #[serde(rename = "exec_payload", default)]
    pub payload: String,

    /// Captured response body or error text
    #[serde(rename = "exec_response", default)]
    pub response: String,

    /// Failure policy
    #[serde(rename = "action_on_fail", default)]
    pub on_fail: OnFail,

    /// Retry limit for retrying policies
    #[serde(default)]
    pub max_retry_attempts: u32,

    /// Retries used so far
    #[serde(default)]
    pub retry_attempts: u32,

    /// Compensating action
    #[serde(default)]
    pub rollback_action: TaskAction,

    /// Compensating address
    #[serde(default)]
    pub rollback_address: String,

    /// Compensating payload
    #[serde(default)]
    pub rollback_payload: String,

    /// Response of the compensating call
    #[serde(default)]
    pub rollback_response: String,

    /// Inputs and outputs
    #[serde(rename = "parameters", default)]
    pub params: Vec<Param>,
}

impl Task {
    /// Create a root task in stage 0.
    pub fn new(job_id: JobId, code: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            definition_id: String::new(),
            job_id,
            code: code.into(),
            status: TaskStatus::Created,
            start_at: None,
            finish_at: None,
            sequence: 0,
            parent_id: String::new(),
            timeout: 0,
            action: TaskAction::Delay,
            address: String::new(),
            payload: String::new(),
            response: String::new(),
            on_fail: OnFail::Continue,
            max_retry_attempts: 0,
            retry_attempts: 0,
            rollback_action: TaskAction::Delay,
            rollback_address: String::new(),
            rollback_payload: String::new(),
            rollback_response: String::new(),
            params: Vec::new(),
        }
    }

    /// Use a fixed instance id.
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Place the task under a parent.
    pub fn with_parent(mut self, parent: &TaskId) -> Self {
        self.parent_id = parent.to_string();
        self
    }

    /// Set the stage number.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set the action.
    pub fn with_action(mut self, action: TaskAction) -> Self {
        self.action = action;
        self
    }

    /// Set the address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the timeout in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    /// Set the failure policy and retry limit.
    pub fn with_on_fail(mut self, on_fail: OnFail, max_retry_attempts: u32) -> Self {
        self.on_fail = on_fail;
        self.max_retry_attempts = max_retry_attempts;
        self
    }

    /// Set the compensating call.
    pub fn with_rollback(
        mut self,
        action: TaskAction,
        address: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        self.rollback_action = action;
        self.rollback_address = address.into();
        self.rollback_payload = payload.into();
        self
    }

    /// Add a parameter.
    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Rendered value of the first param with `key`, or empty.
    pub fn param_value(&self, key: &str) -> String {
        param::lookup(&self.params, key)
    }

    /// Params filled from the response.
    pub fn output_params(&self) -> impl Iterator<Item = &Param> {
        self.params.iter().filter(|p| p.is_output())
    }

    /// Whether a compensating call is configured. An unset rollback action
    /// deserializes as a bare delay with no address.
    pub fn has_rollback(&self) -> bool {
        self.rollback_action != TaskAction::Delay || !self.rollback_address.is_empty()
    }

    /// Whether the task has no parent.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_empty()
    }

    /// The `(parent, sequence)` group this task belongs to.
    pub fn group(&self) -> (&str, u32) {
        (&self.parent_id, self.sequence)
    }
}
