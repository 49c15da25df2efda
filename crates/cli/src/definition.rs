//! Job definition files.
//!
//! ```json
//! {
//!   "job":   { "id": "job-1", "parameters": [ ... ] },
//!   "tasks": [ { "id": "t1", "code": "create", ... } ]
//! }
//! ```

use std::path::Path;
use anyhow::{Context, Result};
use jobworker_core::{Job, Task};
use serde::Deserialize;

/// A job header plus its task set.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDefinition {
    /// Job header
    pub job: Job,
    /// Tasks in dispatch order
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl JobDefinition {
    /// Parse a definition and point every task at the job.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut def: JobDefinition = serde_json::from_str(json).context("invalid job definition")?;
        for task in &mut def.tasks {
            task.job_id = def.job.id.clone();
        }
        Ok(def)
    }

    /// Read a definition file.
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing {}", path.display()))
    }
}
