//! jobworker core data models.
//!
//! Jobs, tasks and their typed parameters, plus the structural checks that
//! keep a task graph runnable.

#![warn(missing_docs)]

mod id;
mod param;
mod task;
mod job;
mod graph;
mod system;

pub use id::{JobId, TaskId, ServiceId};
pub use param::{lookup, Param, ParamScope, ParamType, ParamValue};
pub use task::{Task, TaskStatus, TaskAction, OnFail};
pub use job::{Job, JobStatus};
pub use graph::{validate_graph, GraphIssue};
pub use system::{
    SystemParams, API_HOST, API_LOGIN_URL, API_LOGIN_EMAIL, API_LOGIN_PASSWORD, DEFAULT_LANGUAGE,
};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
