//! Job model - one execution of a task graph.

use serde::{Deserialize, Serialize};
use crate::id::{JobId, ServiceId};
use crate::param::{self, Param};
use crate::Time;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Being assembled by the producer
    Creating,
    /// Ready to be queued
    #[default]
    Created,
    /// Waiting in the intake queue
    Queued,
    /// A worker is running it
    Processing,
    /// Every task finished and none failed
    Completed,
    /// At least one task failed
    Fail,
}

impl JobStatus {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Creating => "creating",
            JobStatus::Created => "created",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Fail => "fail",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted job header. The task set is stored separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Instance id
    pub id: JobId,

    /// Worker service that ran the job
    #[serde(default)]
    pub service_id: Option<ServiceId>,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Run start
    #[serde(default)]
    pub start_at: Option<Time>,

    /// Run end
    #[serde(default)]
    pub finish_at: Option<Time>,

    /// Job-scope inputs
    #[serde(rename = "parameters", default)]
    pub params: Vec<Param>,
}

impl Job {
    /// Create a job with no params.
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            service_id: None,
            status: JobStatus::Created,
            start_at: None,
            finish_at: None,
            params: Vec::new(),
        }
    }

    /// Add a job-scope param.
    pub fn with_param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    /// Rendered value of the first param with `key`, or empty.
    pub fn param_value(&self, key: &str) -> String {
        param::lookup(&self.params, key)
    }
}
